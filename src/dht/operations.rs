//! DHT store operations
//!
//! Read, write, exists and compare-and-swap, each built from a lookup and
//! a small request/response exchange with the nearest set.

use crate::dht::dht::CrnNode;
use crate::dht::message::{ReadOutcome, Request, Response, ResponseKind, TxnId, WriteOutcome};
use crate::dht::node::{NodeId, PeerRecord};
use anyhow::Result;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Result of one read attempt
enum ReadAttempt {
    Found(String),
    NotFound,
    NoAnswer,
}

impl CrnNode {
    /// Whether `key` is stored locally.
    ///
    /// `E` probes go to the nearest set as a hint to the network, but the
    /// answer is the local membership test.
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        let nearest = self.locate_nearest(key).await?;
        let request = Request::Exists { key: key.to_string() };
        for peer in &nearest {
            self.send_request(peer, &TxnId::random(), &request).await?;
        }
        Ok(self.store.contains(key))
    }

    /// Read `key`, from the local store if present, otherwise from the network
    pub async fn read(&mut self, key: &str) -> Result<Option<String>> {
        self.ensure_ready()?;
        if let Some(value) = self.store.get(key) {
            return Ok(Some(value.to_string()));
        }

        let target = NodeId::for_key(key);
        let request = Request::Read { key: key.to_string() };
        let mut visited: HashSet<String> = HashSet::new();

        for attempt in 0..self.config.read_attempts {
            let nearest = self.locate_nearest(key).await?;
            let candidates: Vec<PeerRecord> = nearest
                .into_iter()
                .filter(|p| !visited.contains(&p.name))
                .take(self.config.read_fanout)
                .collect();

            if !candidates.is_empty() {
                let txn = TxnId::random();
                self.transactions
                    .register(txn.clone(), ResponseKind::Read, self.config.read_timeout);
                for peer in &candidates {
                    visited.insert(peer.name.clone());
                    self.send_request(peer, &txn, &request).await?;
                }
                let outcome = self.await_read(&txn).await?;
                self.transactions.complete(&txn);
                match outcome {
                    ReadAttempt::Found(value) => {
                        debug!("Read {} on attempt {}", key, attempt + 1);
                        return Ok(Some(value));
                    }
                    ReadAttempt::NotFound => {
                        debug!("{} reported missing by a closest node", key);
                        return Ok(None);
                    }
                    ReadAttempt::NoAnswer => {}
                }
            }

            if attempt % 3 == 0 {
                self.widen(&target).await?;
                self.drain(self.config.expand_drain).await?;
            }
            self.drain(self.config.retry_pause).await?;
        }

        info!("{} not found after {} attempts", key, self.config.read_attempts);
        Ok(None)
    }

    async fn await_read(&mut self, txn: &TxnId) -> Result<ReadAttempt> {
        let deadline = Instant::now() + self.config.read_timeout;
        while let Some((from, response)) = self.await_response(txn, deadline).await? {
            match response {
                Response::Read(ReadOutcome::Found(value)) => return Ok(ReadAttempt::Found(value)),
                Response::Read(ReadOutcome::NotFound) => return Ok(ReadAttempt::NotFound),
                Response::Read(ReadOutcome::Unknown) => {}
                Response::Info { text } => {
                    debug!("Read attempt ended by {}: {}", from, text);
                    break;
                }
                _ => {}
            }
        }
        Ok(ReadAttempt::NoAnswer)
    }

    /// Write `key` to the nearest set and the local store.
    ///
    /// Returns whether any node acknowledged. The local store is updated
    /// either way.
    pub async fn write(&mut self, key: &str, value: &str) -> Result<bool> {
        let nearest = self.locate_nearest(key).await?;
        let request = Request::Write { key: key.to_string(), value: value.to_string() };
        let txn = TxnId::random();
        let mut acknowledged = false;

        if !nearest.is_empty() {
            for round in 0..2 {
                if round > 0 {
                    debug!("No acknowledgement for {}, resending", key);
                }
                self.transactions
                    .register(txn.clone(), ResponseKind::Write, self.config.write_timeout);
                for peer in &nearest {
                    self.send_request(peer, &txn, &request).await?;
                }

                let deadline = Instant::now() + self.config.write_timeout;
                while let Some((from, response)) = self.await_response(&txn, deadline).await? {
                    match response {
                        Response::Write(WriteOutcome::Added | WriteOutcome::Replaced) => {
                            debug!("Write of {} acknowledged by {}", key, from);
                            acknowledged = true;
                            break;
                        }
                        Response::Info { text } => debug!("Write relay failure from {}: {}", from, text),
                        _ => {}
                    }
                }
                if acknowledged {
                    break;
                }
            }
            self.transactions.complete(&txn);
        }

        self.store.put(key, value);
        if !acknowledged {
            info!("Write of {} was not acknowledged, kept locally", key);
        }
        Ok(acknowledged)
    }

    /// Compare-and-swap against the local store.
    ///
    /// `C` requests go to the nearest set without waiting for replies. The
    /// result reflects the local copy only, so replicas may disagree.
    pub async fn compare_and_swap(&mut self, key: &str, expected: &str, new: &str) -> Result<bool> {
        let nearest = self.locate_nearest(key).await?;
        let request = Request::CompareAndSwap {
            key: key.to_string(),
            expected: expected.to_string(),
            new: new.to_string(),
        };
        for peer in &nearest {
            self.send_request(peer, &TxnId::random(), &request).await?;
        }
        let swapped = self.store.compare_and_swap(key, expected, new);
        debug!("Compare-and-swap of {}: {}", key, swapped);
        Ok(swapped)
    }
}
