//! DHT (Distributed Hash Table) module
//!
//! Implements a CRN-25 node: wire codec, distance ranking, lookups, store
//! operations and relaying over UDP.

pub mod node;
pub mod routing;
pub mod message;
pub mod transaction;
pub mod transport;
pub mod config;
pub mod storage;
pub mod relay;
pub mod lookup;
pub mod operations;
pub mod bootstrap;
pub mod dht;

// Re-exports for convenience
pub use node::{hash_id, NodeId, NodeIdentity, PeerRecord};
pub use routing::{AddressBook, K, NODE_PREFIX};
pub use message::{
    decode_crn_string, encode_crn_string, Body, CasOutcome, Envelope, Message, Presence,
    ReadOutcome, Request, Response, ResponseKind, TxnId, WriteOutcome, MAX_DATAGRAM_SIZE,
};
pub use transaction::{PendingTransaction, TransactionTracker};
pub use transport::{Transport, UdpTransport};
pub use config::NodeConfig;
pub use storage::{LocalStore, StoredEntry};
pub use relay::{RelayStack, RelayTable};
pub use bootstrap::{bootstrap, parse_peer, BootstrapConfig};
pub use dht::{CrnNode, NodeSnapshot};
