//! Lobby wire framing over TCP
//!
//! Every frame starts with a one-byte header. Chat frames carry a line of
//! text ending in `\n`. A match frame from a client toggles its place in the
//! matchmaking queue; a match frame from the server announces the pairing.

use crate::protocol::ProtocolError;
use log::debug;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const MSG_CHAT: u8 = 1;
pub const MSG_MATCH: u8 = 2;

const MATCHED_PREFIX: &str = "Matched! You are Player ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyMessage {
    Chat(String),
    /// Client to server: join or leave the matchmaking queue
    MatchToggle,
    /// Server to client: a pairing was made and this is your identity
    Matched { player: u8 },
}

impl LobbyMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LobbyMessage::Chat(text) => {
                let mut frame = Vec::with_capacity(text.len() + 2);
                frame.push(MSG_CHAT);
                frame.extend_from_slice(text.trim_end_matches('\n').as_bytes());
                frame.push(b'\n');
                frame
            }
            LobbyMessage::MatchToggle => vec![MSG_MATCH],
            LobbyMessage::Matched { player } => {
                let mut frame = vec![MSG_MATCH];
                frame.extend_from_slice(format!("{}{}.\n", MATCHED_PREFIX, player).as_bytes());
                frame
            }
        }
    }
}

/// Extracts the player number from a "Matched! You are Player N." line
pub fn parse_matched_line(line: &str) -> Result<u8, ProtocolError> {
    line.trim()
        .strip_prefix(MATCHED_PREFIX)
        .map(|rest| rest.trim_end_matches('.'))
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ProtocolError::MalformedLobbyFrame(line.trim().to_string()))
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut body = Vec::new();
    if reader.read_until(b'\n', &mut body).await? == 0 {
        return Ok(None);
    }
    Ok(Some(
        String::from_utf8_lossy(&body).trim_end().to_string(),
    ))
}

/// Reads the next frame a client sent; `None` once the stream closes
pub async fn read_client_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> io::Result<Option<LobbyMessage>> {
    loop {
        let head = match reader.read_u8().await {
            Ok(head) => head,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };

        match head {
            MSG_MATCH => return Ok(Some(LobbyMessage::MatchToggle)),
            MSG_CHAT => return Ok(read_line(reader).await?.map(LobbyMessage::Chat)),
            other => debug!("Skipping unknown lobby header {}", other),
        }
    }
}

/// Reads the next frame the server sent; `None` once the stream closes
pub async fn read_server_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> io::Result<Option<LobbyMessage>> {
    loop {
        let head = match reader.read_u8().await {
            Ok(head) => head,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };

        match head {
            MSG_CHAT => return Ok(read_line(reader).await?.map(LobbyMessage::Chat)),
            MSG_MATCH => {
                let Some(line) = read_line(reader).await? else {
                    return Ok(None);
                };
                let player = parse_matched_line(&line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                return Ok(Some(LobbyMessage::Matched { player }));
            }
            other => debug!("Skipping unknown lobby header {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_encode_frames() {
        assert_eq!(LobbyMessage::Chat("hi".into()).encode(), b"\x01hi\n".to_vec());
        assert_eq!(
            LobbyMessage::Chat("hi\n".into()).encode(),
            b"\x01hi\n".to_vec()
        );
        assert_eq!(LobbyMessage::MatchToggle.encode(), vec![MSG_MATCH]);
        assert_eq!(
            LobbyMessage::Matched { player: 2 }.encode(),
            b"\x02Matched! You are Player 2.\n".to_vec()
        );
    }

    #[test]
    fn test_parse_matched_line() {
        assert_eq!(parse_matched_line("Matched! You are Player 1.").unwrap(), 1);
        assert_eq!(
            parse_matched_line("Matched! You are Player 2.\n").unwrap(),
            2
        );
        assert!(parse_matched_line("Matched!").is_err());
        assert!(parse_matched_line("Matched! You are Player x.").is_err());
    }

    #[tokio::test]
    async fn test_read_client_frames() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\x01hello there\n")
            .read(b"\x07")
            .read(b"\x02")
            .build();
        let mut reader = BufReader::new(mock);

        assert_eq!(
            read_client_message(&mut reader).await.unwrap(),
            Some(LobbyMessage::Chat("hello there".into()))
        );
        assert_eq!(
            read_client_message(&mut reader).await.unwrap(),
            Some(LobbyMessage::MatchToggle)
        );
        assert_eq!(read_client_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_server_frames() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\x01[System] Matching queue registered.\n")
            .read(b"\x02Matched! You are Player 1.\n")
            .build();
        let mut reader = BufReader::new(mock);

        assert_eq!(
            read_server_message(&mut reader).await.unwrap(),
            Some(LobbyMessage::Chat(
                "[System] Matching queue registered.".into()
            ))
        );
        assert_eq!(
            read_server_message(&mut reader).await.unwrap(),
            Some(LobbyMessage::Matched { player: 1 })
        );
        assert_eq!(read_server_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_server_rejects_bad_match_line() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\x02you won\n")
            .build();
        let mut reader = BufReader::new(mock);

        let err = read_server_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
