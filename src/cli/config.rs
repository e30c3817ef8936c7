//! CLI configuration module
//!
//! Turns parsed arguments into validated node settings.

use crate::cli::args::{CliArgs, Command};
use crate::dht::bootstrap::{parse_peer, BootstrapConfig};
use crate::dht::config::NodeConfig;
use crate::dht::routing::NODE_PREFIX;
use crate::error::CrnError;
use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Configuration for a CRN-25 node process
#[derive(Debug, Clone)]
pub struct Config {
    /// Node name
    pub name: String,
    /// Local bind address
    pub bind: IpAddr,
    /// Listening port
    pub port: u16,
    /// Address reported to other nodes
    pub advertise: Option<SocketAddr>,
    /// Known peers
    pub peers: Vec<(String, SocketAddr)>,
    /// Relay names, first hop first
    pub relays: Vec<String>,
    /// Announce our own address after bootstrapping
    pub announce: bool,
    /// How long to keep serving after the command
    pub linger: Duration,
    /// Protocol timings
    pub node: NodeConfig,
    /// Command to run
    pub command: Command,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let peers = args
            .peers
            .iter()
            .map(|spec| parse_peer(spec))
            .collect::<Result<Vec<_>>>()?;

        let mut node = NodeConfig::default();
        if let Some(ms) = args.lookup_timeout {
            node.lookup_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = args.read_timeout {
            node.read_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = args.read_attempts {
            node.read_attempts = attempts;
        }

        Ok(Self {
            name: args.name.clone(),
            bind: args.bind,
            port: args.port,
            advertise: args.advertise,
            peers,
            relays: args.relays.clone(),
            announce: args.announce,
            linger: Duration::from_millis(args.linger),
            node,
            command: args.command.clone(),
            verbose: args.verbose,
            quiet: args.quiet,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.name.starts_with(NODE_PREFIX) {
            return Err(CrnError::config_error_with_field(
                format!("Node name must start with {}", NODE_PREFIX),
                "name",
            )
            .into());
        }

        if self.port == 0 {
            return Err(CrnError::config_error_with_field("Port cannot be 0", "port").into());
        }

        if let Some(relay) = self.relays.iter().find(|r| !r.starts_with(NODE_PREFIX)) {
            return Err(CrnError::config_error_with_field(
                format!("Relay {} must start with {}", relay, NODE_PREFIX),
                "relay",
            )
            .into());
        }

        if self.verbose && self.quiet {
            return Err(CrnError::config_error("--verbose and --quiet are mutually exclusive").into());
        }

        self.node.validate()
    }

    /// Get the listen address
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Bootstrap settings derived from the peer list
    pub fn bootstrap(&self) -> BootstrapConfig {
        BootstrapConfig::new(self.peers.clone()).with_announce(self.announce)
    }
}
