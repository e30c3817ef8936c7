//! DHT transaction module
//!
//! Correlates outbound requests with inbound responses by transaction ID.

use crate::dht::message::{Response, ResponseKind, TxnId};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A request awaiting its response
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub txn: TxnId,
    pub expected: ResponseKind,
    pub created_at: Instant,
    pub deadline: Instant,
    responses: VecDeque<(SocketAddr, Response)>,
}

impl PendingTransaction {
    pub fn new(txn: TxnId, expected: ResponseKind, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            txn,
            expected,
            created_at: now,
            deadline: now + timeout,
            responses: VecDeque::new(),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }

    /// Responses are accepted when they carry the expected kind, or are
    /// informational messages such as relay failures
    pub fn accepts(&self, response: &Response) -> bool {
        let kind = response.kind();
        kind == self.expected || kind == ResponseKind::Info
    }
}

/// Table of pending transactions
#[derive(Debug, Default)]
pub struct TransactionTracker {
    pending: HashMap<TxnId, PendingTransaction>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a transaction, or extend the deadline of one being resent
    pub fn register(&mut self, txn: TxnId, expected: ResponseKind, timeout: Duration) {
        match self.pending.get_mut(&txn) {
            Some(existing) => {
                existing.deadline = Instant::now() + timeout;
                existing.expected = expected;
            }
            None => {
                trace!("Tracking transaction {} expecting {:?}", txn, expected);
                self.pending.insert(txn.clone(), PendingTransaction::new(txn, expected, timeout));
            }
        }
    }

    /// Hand an inbound response to its transaction. Returns false if nothing was waiting for it.
    pub fn deliver(&mut self, txn: &TxnId, from: SocketAddr, response: Response) -> bool {
        match self.pending.get_mut(txn) {
            Some(pending) if pending.accepts(&response) => {
                pending.responses.push_back((from, response));
                true
            }
            Some(pending) => {
                debug!(
                    "Transaction {} expected {:?} but got {:?} from {}",
                    txn,
                    pending.expected,
                    response.kind(),
                    from
                );
                false
            }
            None => false,
        }
    }

    /// Oldest undelivered response for a transaction
    pub fn take_response(&mut self, txn: &TxnId) -> Option<(SocketAddr, Response)> {
        self.pending.get_mut(txn)?.responses.pop_front()
    }

    /// Stop tracking a transaction
    pub fn complete(&mut self, txn: &TxnId) -> Option<PendingTransaction> {
        self.pending.remove(txn)
    }

    pub fn is_pending(&self, txn: &TxnId) -> bool {
        self.pending.contains_key(txn)
    }

    /// Drop transactions whose deadline has passed
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, t| !t.is_expired(now));
        let removed = before - self.pending.len();
        if removed > 0 {
            debug!("Cleaned up {} expired transactions", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::message::{ReadOutcome, WriteOutcome};

    fn from() -> SocketAddr {
        "127.0.0.1:20111".parse().unwrap()
    }

    #[test]
    fn test_deliver_matching_kind() {
        let mut tracker = TransactionTracker::new();
        let txn = TxnId::new("ab");
        tracker.register(txn.clone(), ResponseKind::Read, Duration::from_secs(5));

        assert!(tracker.deliver(&txn, from(), Response::Read(ReadOutcome::NotFound)));
        assert!(!tracker.deliver(&txn, from(), Response::Write(WriteOutcome::Added)));

        let (addr, response) = tracker.take_response(&txn).unwrap();
        assert_eq!(addr, from());
        assert_eq!(response, Response::Read(ReadOutcome::NotFound));
        assert!(tracker.take_response(&txn).is_none());
    }

    #[test]
    fn test_deliver_info_to_any_pending() {
        let mut tracker = TransactionTracker::new();
        let txn = TxnId::new("ab");
        tracker.register(txn.clone(), ResponseKind::Write, Duration::from_secs(5));
        assert!(tracker.deliver(&txn, from(), Response::Info { text: "Relay timeout".into() }));
    }

    #[test]
    fn test_deliver_unknown_transaction() {
        let mut tracker = TransactionTracker::new();
        assert!(!tracker.deliver(&TxnId::new("zz"), from(), Response::Hello { name: "N:x".into() }));
    }

    #[test]
    fn test_responses_queue_in_order() {
        let mut tracker = TransactionTracker::new();
        let txn = TxnId::new("ab");
        tracker.register(txn.clone(), ResponseKind::Read, Duration::from_secs(5));
        tracker.deliver(&txn, from(), Response::Read(ReadOutcome::Unknown));
        tracker.deliver(&txn, from(), Response::Read(ReadOutcome::Found("v".into())));

        assert_eq!(tracker.take_response(&txn).unwrap().1, Response::Read(ReadOutcome::Unknown));
        assert_eq!(
            tracker.take_response(&txn).unwrap().1,
            Response::Read(ReadOutcome::Found("v".into()))
        );
    }

    #[test]
    fn test_purge_expired() {
        let mut tracker = TransactionTracker::new();
        tracker.register(TxnId::new("aa"), ResponseKind::Hello, Duration::ZERO);
        tracker.register(TxnId::new("bb"), ResponseKind::Hello, Duration::from_secs(60));

        let removed = tracker.purge_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(removed, 1);
        assert!(tracker.is_pending(&TxnId::new("bb")));
        assert!(!tracker.is_pending(&TxnId::new("aa")));
    }

    #[test]
    fn test_register_again_extends_deadline() {
        let mut tracker = TransactionTracker::new();
        let txn = TxnId::new("ab");
        tracker.register(txn.clone(), ResponseKind::Write, Duration::ZERO);
        tracker.register(txn.clone(), ResponseKind::Write, Duration::from_secs(60));
        assert_eq!(tracker.purge_expired(Instant::now() + Duration::from_millis(1)), 0);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_complete() {
        let mut tracker = TransactionTracker::new();
        let txn = TxnId::new("ab");
        tracker.register(txn.clone(), ResponseKind::Exists, Duration::from_secs(1));
        assert!(tracker.complete(&txn).is_some());
        assert!(tracker.is_empty());
    }
}
