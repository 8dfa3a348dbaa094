//! Datagram protocol spoken between the two peers and with the rendezvous service

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Literal registration token a client sends to the rendezvous service
pub const REGISTER_TOKEN: &[u8] = b"new";

/// Receive buffer size for every datagram socket in the system
pub const MAX_DATAGRAM_SIZE: usize = 2048;

bitflags! {
    /// What a [`Command`] asks the simulation to do
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ActionMask: u8 {
        const IDLE = 1;
        const MOVE = 2;
        const SHOOT = 4;
        /// Reserved: the command only acknowledges `sequence`
        const ACK = 8;
    }
}

/// The unit of networked intent
///
/// `execution_tick` is fixed at creation (local tick + input delay) and never
/// changes afterwards. `sequence` is assigned by the reliable transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub issuer: u8,
    pub execution_tick: u32,
    pub action: ActionMask,
    pub dest_x: i32,
    pub dest_y: i32,
    pub sequence: u32,
}

impl Command {
    pub fn idle(issuer: u8, execution_tick: u32) -> Self {
        Self {
            issuer,
            execution_tick,
            action: ActionMask::IDLE,
            dest_x: 0,
            dest_y: 0,
            sequence: 0,
        }
    }

    pub fn move_to(issuer: u8, execution_tick: u32, dest_x: i32, dest_y: i32) -> Self {
        Self {
            issuer,
            execution_tick,
            action: ActionMask::MOVE,
            dest_x,
            dest_y,
            sequence: 0,
        }
    }

    pub fn shoot(issuer: u8, execution_tick: u32) -> Self {
        Self {
            issuer,
            execution_tick,
            action: ActionMask::SHOOT,
            dest_x: 0,
            dest_y: 0,
            sequence: 0,
        }
    }

    /// Builds the acknowledgement for a received `sequence`
    pub fn ack(issuer: u8, sequence: u32) -> Self {
        Self {
            issuer,
            execution_tick: 0,
            action: ActionMask::ACK,
            dest_x: 0,
            dest_y: 0,
            sequence,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.action.contains(ActionMask::ACK)
    }

    pub fn wants_move(&self) -> bool {
        self.action.contains(ActionMask::MOVE)
    }

    pub fn wants_shoot(&self) -> bool {
        self.action.contains(ActionMask::SHOOT)
    }
}

/// Everything that travels peer-to-peer in a single datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    /// NAT traversal probe; `nonce` doubles as the role-negotiation draw
    Probe { nonce: u64, reply: bool },
    /// Application command or acknowledgement
    Command(Command),
    /// Terminal handshake: the sender stopped simulating at `tick`
    Goodbye { tick: u32, checksum: u64 },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode packet: {0}")]
    Encode(bincode::Error),
    #[error("failed to decode packet: {0}")]
    Decode(bincode::Error),
    #[error("invalid peer address {0:?}")]
    InvalidPeerAddress(String),
    #[error("malformed lobby frame: {0}")]
    MalformedLobbyFrame(String),
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(data).map_err(ProtocolError::Decode)
    }
}

/// Formats the rendezvous reply naming a matched peer
pub fn format_peer_address(addr: SocketAddr) -> String {
    addr.to_string()
}

/// Parses the rendezvous reply; surrounding whitespace is ignored
pub fn parse_peer_address(data: &[u8]) -> Result<SocketAddr, ProtocolError> {
    let text = String::from_utf8_lossy(data);
    let trimmed = text.trim();
    trimmed
        .parse()
        .map_err(|_| ProtocolError::InvalidPeerAddress(trimmed.to_string()))
}
