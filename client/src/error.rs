use shared::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("both peers drew nonce {0}; restart the handshake")]
    RoleConflict(u64),
    #[error("peer also plays as player {0}")]
    IdentityClash(u8),
    #[error("lobby connection closed before a match was found")]
    LobbyClosed,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
