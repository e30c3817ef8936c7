//! DHT lookup module
//!
//! Single-round nearest-node discovery and liveness probes.

use crate::dht::dht::CrnNode;
use crate::dht::message::{Request, Response, ResponseKind, TxnId};
use crate::dht::node::{NodeId, PeerRecord};
use anyhow::Result;
use std::time::Instant;
use tracing::debug;

impl CrnNode {
    /// Probe known peers for nodes near `key` and return the nearest set.
    ///
    /// A node that knows at most one peer first asks that peer alone, so a
    /// freshly bootstrapped node has something to fan out to. Probes then go
    /// to up to `lookup_fanout` peers in parallel under one shared deadline.
    /// Replies grow the address book as they are dispatched.
    pub async fn locate_nearest(&mut self, key: &str) -> Result<Vec<PeerRecord>> {
        self.ensure_ready()?;
        let target = NodeId::for_key(key);

        let mut asked: Option<String> = None;
        if self.address_book.len() <= 1 {
            let first = self.address_book.peers().next().cloned();
            if let Some(peer) = first {
                debug!("Few known peers, asking {} about {}", peer.name, key);
                asked = Some(peer.name.clone());
                self.probe(&[peer], &target).await?;
            }
        }

        let probes: Vec<PeerRecord> = self
            .address_book
            .peers()
            .filter(|p| asked.as_deref() != Some(p.name.as_str()))
            .take(self.config.lookup_fanout)
            .cloned()
            .collect();
        self.probe(&probes, &target).await?;

        let nearest = self.address_book.nearest(&target);
        debug!(
            "Nearest to {}: {:?}",
            key,
            nearest.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );
        Ok(nearest)
    }

    /// Send `N` to every peer in `peers` and wait until each has answered
    /// or the lookup timeout passes
    async fn probe(&mut self, peers: &[PeerRecord], target: &NodeId) -> Result<()> {
        if peers.is_empty() {
            return Ok(());
        }
        let request = Request::FindNearest { target: *target };
        let deadline = Instant::now() + self.config.lookup_timeout;

        let mut sent = Vec::with_capacity(peers.len());
        for peer in peers {
            let txn = TxnId::random();
            self.transactions
                .register(txn.clone(), ResponseKind::Nearest, self.config.lookup_timeout);
            self.send_request(peer, &txn, &request).await?;
            sent.push(txn);
        }

        let mut outstanding = sent.clone();
        loop {
            outstanding.retain(|txn| self.transactions.take_response(txn).is_none());
            let now = Instant::now();
            if outstanding.is_empty() || now >= deadline {
                break;
            }
            self.poll_once(Some(deadline - now)).await?;
        }
        if !outstanding.is_empty() {
            debug!("{} of {} lookup probes went unanswered", outstanding.len(), sent.len());
        }

        for txn in &sent {
            self.transactions.complete(txn);
        }
        Ok(())
    }

    /// Broadcast `N` for `target` to every known peer without waiting
    pub(crate) async fn widen(&mut self, target: &NodeId) -> Result<()> {
        let peers: Vec<PeerRecord> = self.address_book.peers().cloned().collect();
        let request = Request::FindNearest { target: *target };
        for peer in &peers {
            let txn = TxnId::random();
            self.transactions
                .register(txn.clone(), ResponseKind::Nearest, self.config.expand_drain);
            self.send_request(peer, &txn, &request).await?;
        }
        debug!("Widened candidate pool via {} peers", peers.len());
        Ok(())
    }

    /// Whether the named node answers a greeting
    pub async fn is_active(&mut self, name: &str) -> Result<bool> {
        self.ensure_ready()?;
        if self.name() == Some(name) {
            return Ok(true);
        }
        let Some(peer) = self.address_book.get(name).cloned() else {
            debug!("Cannot ping {}: not in the address book", name);
            return Ok(false);
        };

        let txn = TxnId::random();
        self.transactions
            .register(txn.clone(), ResponseKind::Hello, self.config.lookup_timeout);
        self.send_request(&peer, &txn, &Request::Greet).await?;

        let deadline = Instant::now() + self.config.lookup_timeout;
        let mut active = false;
        while let Some((from, response)) = self.await_response(&txn, deadline).await? {
            match response {
                Response::Hello { name: responder } if responder == name => {
                    // Relayed replies arrive from the relay, not the node itself
                    if self.relays.is_empty() {
                        self.address_book.upsert(name, from);
                    }
                    active = true;
                    break;
                }
                Response::Info { text } => {
                    debug!("Ping of {} failed: {}", name, text);
                    break;
                }
                other => debug!("Ignoring {:?} while pinging {}", other, name),
            }
        }
        self.transactions.complete(&txn);
        Ok(active)
    }
}
