//! Types and logic both peers must agree on bit-for-bit: the datagram
//! protocol, lobby framing, integer math and the lockstep simulation.

pub mod fixed;
pub mod lobby;
pub mod protocol;
pub mod simulation;

pub use fixed::{to_fixed, FIXED_SCALE};
pub use lobby::LobbyMessage;
pub use protocol::{ActionMask, Command, Packet, ProtocolError};
pub use simulation::{Outcome, Player, Projectile, RenderView, Simulation};

/// Ticks between issuing a command and executing it
pub const INPUT_DELAY: u32 = 5;

/// Number of participants in a match; identities are 1 and 2
pub const PARTICIPANTS: [u8; 2] = [1, 2];

/// Returns the identity of the other participant
pub fn other_participant(id: u8) -> u8 {
    if id == PARTICIPANTS[0] {
        PARTICIPANTS[1]
    } else {
        PARTICIPANTS[0]
    }
}
