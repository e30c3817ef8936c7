//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};

/// CLI arguments for a CRN-25 node
#[derive(Debug, Parser)]
#[command(name = "crn-node")]
#[command(about = "A CRN-25 distributed hash table node", long_about = None)]
pub struct CliArgs {
    /// Node name, must start with N:
    #[arg(short, long, value_name = "NAME")]
    pub name: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = 20110)]
    pub port: u16,

    /// Local address to bind
    #[arg(long, value_name = "IP", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Address other nodes should use to reach this one
    #[arg(long, value_name = "ADDR")]
    pub advertise: Option<SocketAddr>,

    /// Known peer as NAME=ADDR (repeatable)
    #[arg(long = "peer", value_name = "NAME=ADDR")]
    pub peers: Vec<String>,

    /// Relay to route requests through, first hop first (repeatable)
    #[arg(long = "relay", value_name = "NAME")]
    pub relays: Vec<String>,

    /// Write our own address to the network after bootstrapping
    #[arg(long)]
    pub announce: bool,

    /// Keep serving requests for this many milliseconds after the command finishes
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub linger: u64,

    /// Per-probe lookup timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub lookup_timeout: Option<u64>,

    /// Per-attempt read timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub read_timeout: Option<u64>,

    /// Read attempts before giving up
    #[arg(long, value_name = "N")]
    pub read_attempts: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// What the node does once bootstrapped
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve requests until interrupted
    Serve,
    /// Read a key
    Get { key: String },
    /// Write a key
    Put { key: String, value: String },
    /// Compare-and-swap a key
    Cas { key: String, expected: String, new: String },
    /// Check whether a key is stored locally
    Exists { key: String },
    /// Check whether a node answers
    Ping { name: String },
    /// Print the node's state as JSON
    Dump,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["crn-node", "--name", "N:alice", "serve"]).unwrap();
        assert_eq!(args.name, "N:alice");
        assert_eq!(args.port, 20110);
        assert_eq!(args.bind.to_string(), "0.0.0.0");
        assert!(args.peers.is_empty());
        assert_eq!(args.linger, 0);
        assert_eq!(args.command, Command::Serve);
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_repeated_options_and_subcommand() {
        let args = CliArgs::try_parse_from([
            "crn-node",
            "--name",
            "N:alice",
            "--peer",
            "N:bob=127.0.0.1:20111",
            "--peer",
            "N:carol=127.0.0.1:20112",
            "--relay",
            "N:bob",
            "-v",
            "put",
            "D:hello",
            "big world",
        ])
        .unwrap();
        assert_eq!(args.peers.len(), 2);
        assert_eq!(args.relays, vec!["N:bob".to_string()]);
        assert!(args.is_verbose());
        assert_eq!(
            args.command,
            Command::Put { key: "D:hello".into(), value: "big world".into() }
        );
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(CliArgs::try_parse_from(["crn-node", "--name", "N:alice"]).is_err());
    }
}
