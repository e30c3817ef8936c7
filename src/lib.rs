//! crn-node
//!
//! A CRN-25 distributed hash table node with relaying, lookups and
//! compare-and-swap over UDP.

pub mod dht;
pub mod cli;
pub mod error;

pub use error::CrnError;

pub use dht::{
    bootstrap, hash_id, parse_peer, AddressBook, BootstrapConfig, CrnNode, Message, NodeConfig,
    NodeId, NodeIdentity, NodeSnapshot, PeerRecord, Request, Response, Transport, TxnId,
    UdpTransport,
};
pub use cli::{CliArgs, Command, Config};
