//! Lobby client: chat until the server announces a match

use crate::error::ClientError;
use log::{info, warn};
use shared::lobby::read_server_message;
use shared::LobbyMessage;
use std::net::SocketAddr;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub const MATCH_COMMAND: &str = "/match";

/// Maps a typed line to its lobby frame
pub fn message_for_line(line: &str) -> LobbyMessage {
    if line.trim() == MATCH_COMMAND {
        LobbyMessage::MatchToggle
    } else {
        LobbyMessage::Chat(line.to_string())
    }
}

/// Chats with the lobby at `addr` until matched; returns our player number
pub async fn run_lobby(
    addr: SocketAddr,
    lines: &mut mpsc::UnboundedReceiver<String>,
) -> Result<u8, ClientError> {
    let stream = TcpStream::connect(addr).await?;
    info!("Connected to lobby at {}; type {} to queue", addr, MATCH_COMMAND);
    let (reader, mut writer) = stream.into_split();

    // Line reads are not cancel safe, so they live in their own task
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            match read_server_message(&mut reader).await {
                Ok(Some(message)) => {
                    if events_tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Lobby read error: {}", e);
                    break;
                }
            }
        }
    });

    let mut lines_open = true;
    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LobbyMessage::Chat(text)) => info!("{}", text),
                Some(LobbyMessage::Matched { player }) => {
                    info!("Matched! You are Player {}.", player);
                    break Ok(player);
                }
                Some(LobbyMessage::MatchToggle) => {}
                None => break Err(ClientError::LobbyClosed),
            },
            line = lines.recv(), if lines_open => match line {
                Some(line) => writer.write_all(&message_for_line(&line).encode()).await?,
                None => lines_open = false,
            },
        }
    };

    reader_task.abort();
    result
}
