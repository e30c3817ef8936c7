//! DHT relay module
//!
//! Outbound requests are wrapped in a flat hop list built from the relay
//! stack. Inbound envelopes are stripped one hop at a time: intermediate
//! relays forward and remember a return route, the final relay delivers the
//! wrapped message to its target and retransmits until a reply arrives.

use crate::dht::dht::CrnNode;
use crate::dht::message::{Envelope, Message, Response, TxnId, RELAY_TIMEOUT_TEXT, RELAY_UNKNOWN_TEXT};
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Caller-maintained stack of relay names. The base of the stack is the
/// first hop.
#[derive(Debug, Clone, Default)]
pub struct RelayStack {
    hops: Vec<String>,
}

impl RelayStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>) {
        self.hops.push(name.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.hops.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Relay names, first hop first
    pub fn hops(&self) -> &[String] {
        &self.hops
    }

    /// First relay to contact and the hop list it should receive for `target`.
    ///
    /// With relays `[r1, r2]` the envelope goes to `r1` carrying `[r2, target]`.
    pub fn route_to(&self, target: &str) -> Option<(String, Vec<String>)> {
        let (first, rest) = self.hops.split_first()?;
        let mut hops = rest.to_vec();
        hops.push(target.to_string());
        Some((first.clone(), hops))
    }
}

/// Where a reply arriving from downstream must be sent
#[derive(Debug, Clone)]
pub struct RelayEntry {
    pub reply_txn: TxnId,
    pub upstream: SocketAddr,
    pub target: SocketAddr,
    /// Wrapped message to retransmit. `None` for pure return routes.
    pub payload: Option<String>,
    pub attempts: u32,
    pub deadline: Instant,
}

/// Work produced by an expired relay entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    Resend { target: SocketAddr, payload: String },
    GiveUp { upstream: SocketAddr, reply_txn: TxnId },
}

/// Return routes and pending retransmissions, keyed by the transaction ID
/// the downstream node will reply with and the address it replies from
#[derive(Debug, Default)]
pub struct RelayTable {
    entries: HashMap<(TxnId, SocketAddr), RelayEntry>,
}

impl RelayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember where to send a reply without retransmitting
    pub fn insert_route(
        &mut self,
        txn: TxnId,
        target: SocketAddr,
        reply_txn: TxnId,
        upstream: SocketAddr,
        deadline: Instant,
    ) {
        self.entries.insert(
            (txn, target),
            RelayEntry { reply_txn, upstream, target, payload: None, attempts: 1, deadline },
        );
    }

    /// Remember where to send a reply and retransmit `payload` until one arrives
    pub fn insert_retransmit(
        &mut self,
        txn: TxnId,
        target: SocketAddr,
        reply_txn: TxnId,
        upstream: SocketAddr,
        payload: String,
        deadline: Instant,
    ) {
        self.entries.insert(
            (txn, target),
            RelayEntry { reply_txn, upstream, target, payload: Some(payload), attempts: 1, deadline },
        );
    }

    /// Route for a reply. Retransmission stops once the target has answered;
    /// the route itself stays until its deadline so every reply sharing the
    /// transaction ID finds its way back.
    pub fn reply_route(&mut self, txn: &TxnId, from: SocketAddr) -> Option<RelayEntry> {
        let entry = self.entries.get_mut(&(txn.clone(), from))?;
        entry.payload = None;
        Some(entry.clone())
    }

    /// Collect retransmissions and failures for entries past their deadline
    pub fn due(&mut self, now: Instant, max_attempts: u32, retry_after: Duration) -> Vec<RelayAction> {
        let mut actions = Vec::new();
        self.entries.retain(|_, entry| {
            if entry.deadline > now {
                return true;
            }
            let Some(payload) = entry.payload.clone() else {
                return false;
            };
            if entry.attempts < max_attempts {
                entry.attempts += 1;
                entry.deadline = now + retry_after;
                actions.push(RelayAction::Resend { target: entry.target, payload });
                true
            } else {
                actions.push(RelayAction::GiveUp {
                    upstream: entry.upstream,
                    reply_txn: entry.reply_txn.clone(),
                });
                false
            }
        });
        actions
    }

    /// Earliest deadline across all entries
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CrnNode {
    /// Handle an inbound envelope.
    ///
    /// Returns the wrapped message when this node is the final target, so
    /// the dispatch loop can process it under the envelope's transaction ID.
    pub(crate) async fn handle_envelope(
        &mut self,
        txn: TxnId,
        envelope: Envelope,
        from: SocketAddr,
    ) -> Result<Option<Message>> {
        if envelope.hops.len() > 1 {
            let Some((next, rest)) = envelope.strip_hop() else {
                return Ok(None);
            };
            let Some(next_addr) = self.address_book.addr_of(&next) else {
                debug!("Cannot forward relay {} from {}: unknown hop {}", txn, from, next);
                if rest.expects_reply() || rest.wraps_relay() {
                    self.send_info(from, txn, RELAY_UNKNOWN_TEXT).await?;
                }
                return Ok(None);
            };
            debug!("Forwarding relay {} from {} to {} ({} hops left)", txn, from, next, rest.hops.len());
            // Must outlive the give-up of every relay further down the chain
            let downstream = rest.hops.len() as u32 + 1;
            let deadline =
                Instant::now() + self.config.relay_timeout * self.config.relay_attempts * downstream;
            self.relay_table.insert_route(txn.clone(), next_addr, txn.clone(), from, deadline);
            return self.send_message(next_addr, &Message::relay(txn, rest)).await.map(|_| None);
        }

        let Some(target) = envelope.hops.first() else {
            return Ok(None);
        };

        if self.identity.as_ref().is_some_and(|me| &me.name == target) {
            return match envelope.inner_message() {
                Ok(inner) => {
                    trace!("Relay {} from {} is addressed to us", txn, from);
                    Ok(Some(Message { txn, body: inner.body }))
                }
                Err(e) => {
                    debug!("Dropping relay {} from {} with malformed inner message: {}", txn, from, e);
                    Ok(None)
                }
            };
        }

        let Some(target_addr) = self.address_book.addr_of(target) else {
            debug!("Relay {} from {} names unknown target {}", txn, from, target);
            if envelope.expects_reply() || envelope.wraps_relay() {
                self.send_info(from, txn, RELAY_UNKNOWN_TEXT).await?;
            }
            return Ok(None);
        };

        let payload = envelope.inner_payload();
        let now = Instant::now();
        if envelope.expects_reply() {
            self.relay_table.insert_retransmit(
                envelope.inner_txn.clone(),
                target_addr,
                txn.clone(),
                from,
                payload.clone(),
                now + self.config.relay_timeout,
            );
        } else if envelope.wraps_relay() {
            let deadline = now + self.config.relay_timeout * self.config.relay_attempts;
            self.relay_table
                .insert_route(envelope.inner_txn.clone(), target_addr, txn.clone(), from, deadline);
        }
        debug!("Relaying {} from {} to {} at {}", txn, from, target, target_addr);
        self.send_raw(target_addr, &payload).await?;
        Ok(None)
    }

    /// Pass a downstream reply back upstream. Returns false if no route matched.
    pub(crate) async fn route_reply(&mut self, txn: &TxnId, from: SocketAddr, response: &Response) -> Result<bool> {
        let Some(entry) = self.relay_table.reply_route(txn, from) else {
            return Ok(false);
        };
        trace!("Returning relayed reply {} -> {} as {}", txn, entry.upstream, entry.reply_txn);
        self.send_message(entry.upstream, &Message::response(entry.reply_txn, response.clone()))
            .await?;
        Ok(true)
    }

    /// Retransmit or give up on relays whose deadline has passed
    pub(crate) async fn service_relays(&mut self, now: Instant) -> Result<()> {
        let actions = self
            .relay_table
            .due(now, self.config.relay_attempts, self.config.relay_timeout);
        for action in actions {
            match action {
                RelayAction::Resend { target, payload } => {
                    debug!("Retransmitting relayed message to {}", target);
                    self.send_raw(target, &payload).await?;
                }
                RelayAction::GiveUp { upstream, reply_txn } => {
                    debug!("Relay {} to upstream {} timed out", reply_txn, upstream);
                    self.send_info(upstream, reply_txn, RELAY_TIMEOUT_TEXT).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_info(&self, to: SocketAddr, txn: TxnId, text: &str) -> Result<()> {
        self.send_message(to, &Message::response(txn, Response::Info { text: text.to_string() }))
            .await
    }
}
