#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crn_node::{CrnNode, NodeConfig};

/// Protocol timings shortened so multi-node scenarios finish quickly
pub fn fast_config() -> NodeConfig {
    NodeConfig {
        lookup_timeout: Duration::from_millis(150),
        read_timeout: Duration::from_millis(400),
        write_timeout: Duration::from_millis(300),
        relay_timeout: Duration::from_millis(200),
        relay_attempts: 3,
        read_attempts: 3,
        lookup_fanout: 5,
        read_fanout: 5,
        expand_drain: Duration::from_millis(100),
        retry_pause: Duration::from_millis(50),
    }
}

/// A named node bound to an ephemeral loopback port
pub async fn make_node(name: &str) -> CrnNode {
    let mut node = CrnNode::new(fast_config());
    node.set_node_name(name).expect("valid node name");
    node.bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind loopback");
    node
}

pub fn addr_of(node: &CrnNode) -> SocketAddr {
    node.local_addr().expect("node is bound")
}

/// Add `other` to `node`'s address book
pub fn introduce(node: &mut CrnNode, other: &CrnNode) {
    let name = other.name().expect("named node").to_string();
    node.add_peer(&name, addr_of(other)).expect("valid peer");
}

/// Make every node in the list know every other
pub fn mesh(nodes: &mut [&mut CrnNode]) {
    let entries: Vec<(String, SocketAddr)> = nodes
        .iter()
        .map(|n| (n.name().unwrap().to_string(), addr_of(n)))
        .collect();
    for node in nodes.iter_mut() {
        for (name, addr) in &entries {
            node.add_peer(name, *addr).unwrap();
        }
    }
}

/// Address of a bound socket nobody reads from
pub async fn silent_peer() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

/// Receive one datagram as text, or `None` on timeout
pub async fn recv_text(socket: &UdpSocket, wait: Duration) -> Option<String> {
    let mut buf = [0u8; 1024];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(String::from_utf8_lossy(&buf[..len]).into_owned()),
        _ => None,
    }
}
