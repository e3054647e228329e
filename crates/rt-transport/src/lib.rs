//! Best-effort UDP multicast transport between processor processes (§4.8, §6).
//!
//! Completions and criticality-raise notifications are broadcast as small datagrams on a
//! multicast group shared by every processor process in the run. Delivery is best-effort: lost,
//! reordered, or duplicated datagrams are all within spec (§6 "best-effort datagrams, order not
//! guaranteed"), so callers treat anything this crate returns as advisory, never authoritative.
//!
//! Multicast loopback is left enabled deliberately, for two reasons: a processor with more than
//! one core needs to observe its own completions just like any other processor's, and leaving a
//! real socket round-trip in the loop (rather than a short-circuiting local queue) is what gives
//! us the "completions sent during tick t become visible at tick t+1" property from §5 for free
//! — a send cannot be observed via loopback before the next call to `poll_incoming`.

pub mod error;
pub mod wire;

use rt_config::TaskId;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

pub use error::Error;
pub use wire::Packet;

/// Default multicast group used when a run doesn't override it.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 42, 0, 1);
/// Default UDP port used when a run doesn't override it.
pub const DEFAULT_PORT: u16 = 47000;

/// Largest datagram this transport ever sends or expects to receive.
const MAX_DATAGRAM_LEN: usize = 32;

/// A best-effort multicast datagram channel shared by every processor process in a run.
pub struct Transport {
    socket: UdpSocket,
    group: Ipv4Addr,
    port: u16,
}

impl Transport {
    /// Join `group:port` for both sending and receiving. Binds to `0.0.0.0:port` so every
    /// process on the host can share the port (`SO_REUSEADDR`/`SO_REUSEPORT`).
    pub fn new(group: Ipv4Addr, port: u16) -> Result<Self, Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| Error::SocketSetup { source })?;
        socket.set_reuse_address(true).map_err(|source| Error::SocketSetup { source })?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(|source| Error::SocketSetup { source })?;

        let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&bind_addr.into()).map_err(|source| Error::SocketSetup { source })?;
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(|source| Error::SocketSetup { source })?;
        socket.set_multicast_loop_v4(true).map_err(|source| Error::SocketSetup { source })?;
        socket.set_nonblocking(true).map_err(|source| Error::SocketSetup { source })?;

        let socket: UdpSocket = socket.into();
        Ok(Self { socket, group, port })
    }

    /// Join the default group/port (`DEFAULT_MULTICAST_GROUP:DEFAULT_PORT`).
    pub fn new_default() -> Result<Self, Error> {
        Self::new(DEFAULT_MULTICAST_GROUP, DEFAULT_PORT)
    }

    /// Broadcast a completed job to every other processor process on the group.
    pub fn send_completion(&self, task_id: TaskId, arrival_tick: u64, system_tick: u64) {
        let packet = Packet::Completion {
            task_id: task_id.0,
            arrival_tick: truncate_tick(arrival_tick),
            system_tick: truncate_tick(system_tick),
        };
        self.send(packet);
    }

    /// Broadcast a criticality raise to every other processor process on the group.
    pub fn broadcast_criticality(&self, level: u8) {
        self.send(Packet::CriticalityChange { level });
    }

    fn send(&self, packet: Packet) {
        let bytes = packet.encode();
        let dest = SocketAddrV4::new(self.group, self.port);
        if let Err(source) = self.socket.send_to(&bytes, dest) {
            tracing::warn!(%source, "transport send failed, datagram dropped");
        }
    }

    /// Drain every datagram currently queued on the socket, decoding what can be decoded and
    /// discarding (with a WARN) anything malformed (§7 "bad packet"). Never blocks.
    pub fn poll_incoming(&self) -> Vec<Packet> {
        let mut packets = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _from)) => match Packet::decode(&buf[..len]) {
                    Some(packet) => packets.push(packet),
                    None => tracing::warn!(len, "discarding malformed transport datagram"),
                },
                Err(err) if would_block(&err) => break,
                Err(source) => {
                    tracing::warn!(%source, "transport recv failed");
                    break;
                }
            }
        }
        packets
    }
}

fn would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

/// Ticks travel as `u32` on the wire (§6); a run is expected to stay well within range, but a
/// tick counter that somehow overflows wraps rather than panicking a core thread over a
/// diagnostics-only field.
fn truncate_tick(tick: u64) -> u32 {
    tick as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_tick_wraps_rather_than_panics() {
        assert_eq!(truncate_tick(u64::from(u32::MAX) + 5), 4);
    }
}
