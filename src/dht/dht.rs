//! DHT main module
//!
//! The CRN-25 node: owned state, the dispatch loop and inbound request
//! handling. Store operations, lookups and relaying live in sibling modules
//! as further `impl CrnNode` blocks.

use crate::dht::config::NodeConfig;
use crate::dht::message::{
    Body, CasOutcome, Envelope, Message, Presence, ReadOutcome, Request, Response, TxnId, WriteOutcome,
    MAX_DATAGRAM_SIZE,
};
use crate::dht::node::{NodeId, NodeIdentity, PeerRecord};
use crate::dht::relay::{RelayStack, RelayTable};
use crate::dht::routing::{rank_records, AddressBook, K, NODE_PREFIX};
use crate::dht::storage::{LocalStore, StoredEntry};
use crate::dht::transaction::TransactionTracker;
use crate::dht::transport::{Transport, UdpTransport};
use crate::error::CrnError;
use anyhow::Result;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// A CRN-25 node
///
/// All state is owned by the node and mutated from a single logical thread.
/// Every operation that waits for the network keeps servicing inbound
/// traffic through [`CrnNode::poll_once`].
pub struct CrnNode {
    pub(crate) identity: Option<NodeIdentity>,
    pub(crate) config: NodeConfig,
    pub(crate) transport: Option<Box<dyn Transport>>,
    /// Address reported for ourselves in `O` responses
    pub(crate) advertised: Option<SocketAddr>,
    pub(crate) address_book: AddressBook,
    pub(crate) store: LocalStore,
    pub(crate) relays: RelayStack,
    pub(crate) transactions: TransactionTracker,
    pub(crate) relay_table: RelayTable,
}

/// Serializable view of a node's state
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub name: Option<String>,
    pub id: Option<String>,
    pub address: Option<String>,
    pub peers: Vec<PeerRecord>,
    pub entries: Vec<StoredEntry>,
    pub relays: Vec<String>,
    pub pending_transactions: usize,
}

impl Default for CrnNode {
    fn default() -> Self {
        Self::new(NodeConfig::default())
    }
}

impl CrnNode {
    /// Create a node with no name and no open port
    pub fn new(config: NodeConfig) -> Self {
        Self {
            identity: None,
            config,
            transport: None,
            advertised: None,
            address_book: AddressBook::new(),
            store: LocalStore::new(),
            relays: RelayStack::new(),
            transactions: TransactionTracker::new(),
            relay_table: RelayTable::new(),
        }
    }

    /// Set the node's name. Names must start with `N:`.
    pub fn set_node_name(&mut self, name: &str) -> Result<()> {
        if !name.starts_with(NODE_PREFIX) || name.len() == NODE_PREFIX.len() {
            return Err(CrnError::validation_error_with_field(
                format!("Node names must start with {} followed by a name", NODE_PREFIX),
                "name",
            )
            .into());
        }
        let identity = NodeIdentity::new(name);
        info!("Node {} has digest {}", identity.name, identity.id);
        self.identity = Some(identity);
        Ok(())
    }

    /// Bind a UDP port on all interfaces
    pub async fn open_port(&mut self, port: u16) -> Result<()> {
        self.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    /// Bind a UDP socket to a specific address
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        let transport = UdpTransport::bind(addr).await?;
        self.transport = Some(Box::new(transport));
        Ok(())
    }

    /// Use a caller-supplied transport
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Address to report for ourselves when the socket is bound to a wildcard address
    pub fn set_advertised_addr(&mut self, addr: SocketAddr) {
        self.advertised = Some(addr);
    }

    /// Seed the address book
    pub fn add_peer(&mut self, name: &str, addr: SocketAddr) -> Result<()> {
        if !name.starts_with(NODE_PREFIX) {
            return Err(CrnError::validation_error_with_field(
                format!("Peer names must start with {}", NODE_PREFIX),
                "peer",
            )
            .into());
        }
        if self.name() == Some(name) {
            return Ok(());
        }
        self.address_book.upsert(name, addr);
        Ok(())
    }

    /// Route all future requests through `name`, after any relays already pushed
    pub fn push_relay(&mut self, name: &str) {
        debug!("Pushed relay {}", name);
        self.relays.push(name);
    }

    /// Remove the most recently pushed relay
    pub fn pop_relay(&mut self) -> Option<String> {
        let popped = self.relays.pop();
        if let Some(name) = &popped {
            debug!("Popped relay {}", name);
        }
        popped
    }

    pub fn name(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.name.as_str())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport()?.local_addr()
    }

    /// Address other nodes should use to reach us, if known
    pub fn advertised_addr(&self) -> Option<SocketAddr> {
        self.self_record().map(|p| p.addr)
    }

    /// Value held in this node's own store
    pub fn local_value(&self, key: &str) -> Option<&str> {
        self.store.get(key)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.address_book.peers()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            name: self.identity.as_ref().map(|i| i.name.clone()),
            id: self.identity.as_ref().map(|i| i.id.to_hex()),
            address: self.self_record().map(|p| p.addr.to_string()),
            peers: self.address_book.peers().cloned().collect(),
            entries: self.store.entries(),
            relays: self.relays.hops().to_vec(),
            pending_transactions: self.transactions.len(),
        }
    }

    /// Process inbound messages.
    ///
    /// A delay of zero serves forever. Otherwise messages are handled until
    /// `delay_ms` milliseconds have passed.
    pub async fn handle_incoming_messages(&mut self, delay_ms: u64) -> Result<()> {
        self.ensure_ready()?;
        if delay_ms == 0 {
            info!("Serving requests");
            loop {
                self.poll_once(None).await?;
            }
        }
        self.drain(Duration::from_millis(delay_ms)).await
    }

    /// Receive and dispatch at most one datagram.
    ///
    /// Also retransmits due relays and purges expired transactions. Returns
    /// whether a datagram was received within `max_wait`.
    pub async fn poll_once(&mut self, max_wait: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        self.service_relays(now).await?;
        self.transactions.purge_expired(now);

        let wait = match (max_wait, self.relay_table.next_deadline()) {
            (Some(limit), Some(deadline)) => Some(limit.min(deadline.saturating_duration_since(now))),
            (None, Some(deadline)) => Some(deadline.saturating_duration_since(now)),
            (limit, None) => limit,
        };

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let received = match self.transport()?.recv_from(&mut buf, wait).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Receive failed: {}", e);
                None
            }
        };
        let Some((len, from)) = received else {
            return Ok(false);
        };

        match Message::decode_bytes(&buf[..len]) {
            Ok(message) => self.dispatch(message, from).await?,
            Err(e) => debug!("Dropping malformed datagram from {}: {}", from, e),
        }
        Ok(true)
    }

    /// Keep servicing the inbox for `window`
    pub(crate) async fn drain(&mut self, window: Duration) -> Result<()> {
        let deadline = Instant::now() + window;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.poll_once(Some(deadline - now)).await?;
        }
    }

    /// Wait for the next response to `txn`, servicing other traffic meanwhile
    pub(crate) async fn await_response(
        &mut self,
        txn: &TxnId,
        deadline: Instant,
    ) -> Result<Option<(SocketAddr, Response)>> {
        loop {
            if let Some(response) = self.transactions.take_response(txn) {
                return Ok(Some(response));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.poll_once(Some(deadline - now)).await?;
        }
    }

    async fn dispatch(&mut self, message: Message, from: SocketAddr) -> Result<()> {
        let mut next = Some(message);
        while let Some(message) = next.take() {
            trace!("<- {} {:?}", from, message);
            match message.body {
                Body::Request(request) => {
                    if let Some(response) = self.answer(&request, from) {
                        self.send_message(from, &Message::response(message.txn, response)).await?;
                    }
                }
                Body::Response(response) => self.handle_response(message.txn, from, response).await?,
                Body::Relay(envelope) => {
                    next = self.handle_envelope(message.txn, envelope, from).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_response(&mut self, txn: TxnId, from: SocketAddr, response: Response) -> Result<()> {
        if self.route_reply(&txn, from, &response).await? {
            return Ok(());
        }

        let learned = match &response {
            Response::Nearest { nodes } => Some(nodes.clone()),
            _ => None,
        };
        if !self.transactions.deliver(&txn, from, response) {
            trace!("Ignoring unsolicited response {} from {}", txn, from);
            return Ok(());
        }
        if let Some(nodes) = learned {
            let own = self.name().unwrap_or_default().to_string();
            let changed = self
                .address_book
                .merge(&own, nodes.iter().map(|(n, a)| (n.as_str(), a.as_str())));
            if changed > 0 {
                debug!("Learned {} peers from {}", changed, from);
            }
        }
        Ok(())
    }

    /// Build the response to an inbound request
    fn answer(&mut self, request: &Request, from: SocketAddr) -> Option<Response> {
        let Some(me) = self.identity.clone() else {
            debug!("Dropping {} request from {}: node has no name", request.command(), from);
            return None;
        };

        let response = match request {
            Request::Greet => Response::Hello { name: me.name.clone() },
            Request::FindNearest { target } => {
                let candidates = self.address_book.peers().cloned().chain(self.self_record());
                let nodes = rank_records(candidates, target, K)
                    .into_iter()
                    .map(|p| (p.name, p.addr.to_string()))
                    .collect();
                Response::Nearest { nodes }
            }
            Request::Exists { key } => {
                let presence = if self.store.contains(key) {
                    Presence::Yes
                } else if self.is_closest_for(&me, key) {
                    Presence::No
                } else {
                    Presence::Unknown
                };
                Response::Exists(presence)
            }
            Request::Read { key } => {
                let outcome = match self.store.get(key) {
                    Some(value) => ReadOutcome::Found(value.to_string()),
                    None if self.is_closest_for(&me, key) => ReadOutcome::NotFound,
                    None => ReadOutcome::Unknown,
                };
                Response::Read(outcome)
            }
            Request::Write { key, value } => {
                if key.starts_with(NODE_PREFIX) && *key != me.name {
                    if let Ok(addr) = value.parse::<SocketAddr>() {
                        self.address_book.upsert(key, addr);
                    }
                }
                let outcome = if self.is_closest_for(&me, key) {
                    self.store.put(key, value);
                    WriteOutcome::Added
                } else if self.store.contains(key) {
                    self.store.put(key, value);
                    WriteOutcome::Replaced
                } else {
                    WriteOutcome::Rejected
                };
                debug!("Write of {} from {}: {:?}", key, from, outcome);
                Response::Write(outcome)
            }
            Request::CompareAndSwap { key, expected, new } => {
                let outcome = if self.store.compare_and_swap(key, expected, new) {
                    CasOutcome::Swapped
                } else if self.is_closest_for(&me, key) {
                    self.store.put(key, new);
                    CasOutcome::Accepted
                } else {
                    CasOutcome::Rejected
                };
                debug!("Compare-and-swap of {} from {}: {:?}", key, from, outcome);
                Response::CompareAndSwap(outcome)
            }
        };
        Some(response)
    }

    fn is_closest_for(&self, me: &NodeIdentity, key: &str) -> bool {
        self.address_book.is_among_closest(me, &NodeId::for_key(key))
    }

    /// Our own entry as reported to others, when we have a usable address
    fn self_record(&self) -> Option<PeerRecord> {
        let me = self.identity.as_ref()?;
        let addr = match self.advertised {
            Some(addr) => addr,
            None => {
                let local = self.transport.as_deref()?.local_addr().ok()?;
                if local.ip().is_unspecified() {
                    return None;
                }
                local
            }
        };
        Some(PeerRecord::new(me.name.clone(), addr))
    }

    /// Send a request to a peer, through the relay stack when one is set
    pub(crate) async fn send_request(&self, peer: &PeerRecord, txn: &TxnId, request: &Request) -> Result<()> {
        let Some((first, hops)) = self.relays.route_to(&peer.name) else {
            return self.send_message(peer.addr, &Message::request(txn.clone(), request.clone())).await;
        };
        let Some(first_addr) = self.address_book.addr_of(&first) else {
            warn!("Relay {} is not in the address book, dropping {} to {}", first, request.command(), peer.name);
            return Ok(());
        };
        let envelope = Envelope {
            hops,
            inner_txn: txn.clone(),
            inner: request.encode(),
        };
        self.send_message(first_addr, &Message::relay(txn.clone(), envelope)).await
    }

    pub(crate) async fn send_message(&self, addr: SocketAddr, message: &Message) -> Result<()> {
        self.send_raw(addr, &message.encode()).await
    }

    /// Send a datagram. Transport failures are logged, not returned.
    pub(crate) async fn send_raw(&self, addr: SocketAddr, text: &str) -> Result<()> {
        let transport = self.transport()?;
        if text.len() > MAX_DATAGRAM_SIZE {
            warn!("Sending {} byte datagram to {}, larger than {}", text.len(), addr, MAX_DATAGRAM_SIZE);
        }
        trace!("-> {} {:?}", addr, text);
        if let Err(e) = transport.send_to(text.as_bytes(), addr).await {
            warn!("Send to {} failed: {}", addr, e);
        }
        Ok(())
    }

    fn transport(&self) -> Result<&dyn Transport> {
        self.transport.as_deref().ok_or_else(|| {
            let err = match self.name() {
                Some(name) => CrnError::node_error_with_node("Port not open", name),
                None => CrnError::node_error("Port not open"),
            };
            err.into()
        })
    }

    /// Fail unless the node has a name and an open port
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.identity.is_none() {
            return Err(CrnError::node_error("Node name not set").into());
        }
        self.transport()?;
        Ok(())
    }
}
