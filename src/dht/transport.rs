//! Datagram transport abstraction
//!
//! The node only needs three primitives from its transport: send a datagram,
//! receive one with an optional timeout, and report the bound address.

use crate::error::CrnError;
use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{error, info};

/// Unreliable, unordered datagram transport
///
/// Implementations give no delivery guarantees. The node layers its own
/// retries and timeouts on top.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()>;

    /// Receive one datagram into `buf`
    ///
    /// `None` blocks until a datagram arrives. A timeout elapsing yields
    /// `Ok(None)` rather than an error.
    async fn recv_from(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<Option<(usize, SocketAddr)>>;

    /// Address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// UDP transport over a tokio socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a UDP socket
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            error!("Failed to bind UDP socket to {}: {}", addr, e);
            CrnError::network_error_full("Failed to bind UDP socket", addr.to_string(), e.to_string())
        })?;
        if let Ok(local) = socket.local_addr() {
            info!("Listening on {}", local);
        }
        Ok(Self { socket })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket.send_to(data, addr).await.map_err(|e| {
            CrnError::network_error_full("Failed to send datagram", addr.to_string(), e.to_string())
        })?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<Option<(usize, SocketAddr)>> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.socket.recv_from(buf)).await {
                Ok(result) => result,
                Err(_) => return Ok(None),
            },
            None => self.socket.recv_from(buf).await,
        };
        let (len, from) = received.map_err(|e| {
            CrnError::network_error_full("Failed to receive datagram", "unknown", e.to_string())
        })?;
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr().map_err(CrnError::from)?)
    }
}
