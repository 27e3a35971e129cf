//! # UDP Transport Module
//!
//! Point-to-point UDP path between two bridges.
//!
//! This module handles:
//! - Envelope encoding/decoding (see [`envelope`])
//! - Heartbeat ping/pong liveness exchange
//! - Peer STATUS maps (JSON objects)
//! - Traffic counters and liveness (see [`link_monitor`])
//!
//! Sends wait for socket readiness but never retry: a datagram the kernel
//! refuses is dropped and logged, matching UDP's own delivery model.

pub mod envelope;
pub mod link_monitor;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::error::{BridgeError, Result};
use envelope::{now_micros, PacketType, UdpEnvelope, HEARTBEAT_PING, HEARTBEAT_PONG};
pub use link_monitor::{LinkMonitor, LinkStats};

/// Receive buffer size; large enough for any UDP datagram
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// UDP envelope transport
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    monitor: Arc<LinkMonitor>,
}

impl UdpTransport {
    /// Bind `local_port` on all interfaces and resolve the peer once
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or the host does not resolve.
    pub async fn bind(local_port: u16, remote_host: &str, remote_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).await?;

        let remote = tokio::net::lookup_host((remote_host, remote_port))
            .await?
            .next()
            .ok_or_else(|| {
                BridgeError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("remote host {} did not resolve", remote_host),
                ))
            })?;

        info!(
            "UDP transport listening on {} -> {}",
            socket.local_addr()?,
            remote
        );

        Ok(Self::from_socket(socket, remote))
    }

    /// Wrap an already bound socket
    pub fn from_socket(socket: UdpSocket, remote: SocketAddr) -> Self {
        Self {
            socket,
            remote,
            monitor: Arc::new(LinkMonitor::new()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Shared handle to the link counters
    pub fn monitor(&self) -> Arc<LinkMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Send CRSF bytes (one frame, or a raw chunk) to the peer
    pub async fn send_crsf_data(&self, data: &[u8]) -> bool {
        self.send_packet(PacketType::CrsfData, data).await
    }

    /// Send a heartbeat request
    pub async fn send_heartbeat(&self) -> bool {
        self.send_packet(PacketType::Heartbeat, HEARTBEAT_PING).await
    }

    /// Publish a status object as JSON
    pub async fn send_status<T: Serialize>(&self, status: &T) -> bool {
        match serde_json::to_vec(status) {
            Ok(body) => self.send_packet(PacketType::Status, &body).await,
            Err(e) => {
                warn!("Failed to serialize status: {}", e);
                false
            }
        }
    }

    async fn send_packet(&self, packet_type: PacketType, payload: &[u8]) -> bool {
        let datagram = match envelope::encode(packet_type, now_micros(), payload) {
            Ok(d) => d,
            Err(e) => {
                warn!("Not sending {:?} envelope: {}", packet_type, e);
                return false;
            }
        };

        match self.socket.send_to(&datagram, self.remote).await {
            Ok(sent) => {
                self.monitor.record_tx(sent);
                trace!("UDP TX {:?} {} bytes", packet_type, sent);
                true
            }
            Err(e) => {
                warn!("Failed to send UDP envelope: {}", e);
                false
            }
        }
    }

    /// Wait for the next well-formed envelope
    ///
    /// Malformed datagrams are counted and yield `Ok(None)`. Heartbeat pings
    /// are answered and STATUS maps stored before the envelope is returned.
    ///
    /// # Errors
    ///
    /// Returns the socket error; callers log it and keep receiving.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<Option<UdpEnvelope>> {
        let (len, from) = self.socket.recv_from(buf).await?;

        let envelope = match UdpEnvelope::decode(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Discarding datagram from {}: {}", from, e);
                self.monitor.record_malformed();
                return Ok(None);
            }
        };

        self.monitor.record_rx(len);
        trace!("UDP RX {:?} {} bytes from {}", envelope.packet_type, len, from);

        match envelope.packet_type {
            PacketType::Heartbeat => {
                if envelope.is_heartbeat_ping() {
                    self.send_packet(PacketType::Heartbeat, HEARTBEAT_PONG).await;
                }
            }
            PacketType::Status => {
                if let Some(status) = parse_status(&envelope.payload) {
                    debug!("Peer status: {}", serde_json::Value::Object(status.clone()));
                    self.monitor.set_peer_status(status);
                }
            }
            PacketType::CrsfData => {}
        }

        Ok(Some(envelope))
    }
}

/// Decode a STATUS body; anything but a JSON object is ignored
pub fn parse_status(payload: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            debug!("Ignoring non-object status: {}", other);
            None
        }
        Err(e) => {
            debug!("Ignoring undecodable status: {}", e);
            None
        }
    }
}
