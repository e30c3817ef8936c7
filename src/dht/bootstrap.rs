//! DHT bootstrap module
//!
//! Seeds a node's address book and introduces it to the network.

use crate::dht::dht::CrnNode;
use crate::dht::routing::NODE_PREFIX;
use crate::error::CrnError;
use anyhow::Result;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Bootstrap configuration
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Known peers as `(name, address)`
    pub peers: Vec<(String, SocketAddr)>,
    /// Look up our own name after seeding, to learn our neighbourhood
    pub self_lookup: bool,
    /// Write our own `name -> address` pair to the nearest set
    pub announce: bool,
}

impl BootstrapConfig {
    /// Create a bootstrap config
    pub fn new(peers: Vec<(String, SocketAddr)>) -> Self {
        Self { peers, self_lookup: true, announce: false }
    }

    /// Parse peers given as `NAME=ADDR`
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let peers = specs
            .iter()
            .map(|s| parse_peer(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(peers))
    }

    pub fn with_announce(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    pub fn with_self_lookup(mut self, self_lookup: bool) -> Self {
        self.self_lookup = self_lookup;
        self
    }
}

/// Parse a `NAME=ADDR` peer specification
pub fn parse_peer(spec: &str) -> Result<(String, SocketAddr)> {
    let (name, addr) = spec.split_once('=').ok_or_else(|| {
        CrnError::validation_error_with_field(format!("Expected NAME=ADDR, got {:?}", spec), "peer")
    })?;
    let name = name.trim();
    if !name.starts_with(NODE_PREFIX) {
        return Err(CrnError::validation_error_with_field(
            format!("Peer name {:?} must start with {}", name, NODE_PREFIX),
            "peer",
        )
        .into());
    }
    let addr: SocketAddr = addr.trim().parse().map_err(|e: std::net::AddrParseError| {
        CrnError::validation_error_with_field(format!("Invalid address for {}: {}", name, e), "peer")
    })?;
    Ok((name.to_string(), addr))
}

/// Seed the address book, then optionally look ourselves up and announce
pub async fn bootstrap(node: &mut CrnNode, config: &BootstrapConfig) -> Result<()> {
    info!("Bootstrapping with {} known peers", config.peers.len());
    for (name, addr) in &config.peers {
        node.add_peer(name, *addr)?;
        debug!("Seeded {} at {}", name, addr);
    }

    let Some(own_name) = node.name().map(str::to_string) else {
        return Err(CrnError::node_error("Node name not set").into());
    };
    if node.peers().next().is_none() {
        return Ok(());
    }

    if config.self_lookup {
        let nearest = node.locate_nearest(&own_name).await?;
        info!("Bootstrap found {} neighbours, {} peers known", nearest.len(), node.peers().count());
    }

    if config.announce {
        match node.advertised_addr() {
            Some(addr) => {
                let acknowledged = node.write(&own_name, &addr.to_string()).await?;
                debug!("Announced {} at {} (acknowledged: {})", own_name, addr, acknowledged);
            }
            None => warn!("Not announcing {}: no routable address, set one with --advertise", own_name),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let (name, addr) = parse_peer("N:bob=127.0.0.1:20111").unwrap();
        assert_eq!(name, "N:bob");
        assert_eq!(addr, "127.0.0.1:20111".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_parse_peer_rejects_bad_specs() {
        assert!(parse_peer("N:bob").is_err());
        assert!(parse_peer("bob=127.0.0.1:20111").is_err());
        assert!(parse_peer("N:bob=127.0.0.1").is_err());
        assert!(parse_peer("N:bob=localhost:20111").is_err());
    }

    #[test]
    fn test_bootstrap_config_from_specs() {
        let config = BootstrapConfig::from_specs(&["N:a=127.0.0.1:1", "N:b=127.0.0.1:2"]).unwrap();
        assert_eq!(config.peers.len(), 2);
        assert!(config.self_lookup);
        assert!(!config.announce);
        assert!(BootstrapConfig::from_specs(&["junk"]).is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_without_peers() {
        let mut node = CrnNode::default();
        node.set_node_name("N:alice").unwrap();
        node.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        bootstrap(&mut node, &BootstrapConfig::default()).await.unwrap();
        assert_eq!(node.peers().count(), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_requires_name() {
        let mut node = CrnNode::default();
        let config = BootstrapConfig::new(vec![("N:bob".into(), "127.0.0.1:1".parse().unwrap())]);
        assert!(bootstrap(&mut node, &config).await.is_err());
    }
}
