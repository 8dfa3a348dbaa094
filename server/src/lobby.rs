//! TCP lobby with chat broadcast and matchmaking
//!
//! This module handles the server side of the pre-match lobby:
//! - Connected user registry and chat broadcast
//! - Toggling users in and out of the matchmaking queue
//! - A matchmaker task that pairs queued users and tells them who is Player 1
//!
//! Each connection gets a writer task fed by an unbounded channel so that
//! broadcasting never waits on a slow socket while holding the registry lock.

use crate::waiting_room::WaitingRoom;
use log::{debug, info, warn};
use shared::lobby::{read_client_message, LobbyMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

pub type UserId = u64;

/// A connected lobby user
#[derive(Debug)]
pub struct User {
    pub id: UserId,
    pub addr: SocketAddr,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

/// Registry of every connected user
///
/// Ids start from 1 and are never reused within one server run.
pub struct Users {
    users: HashMap<UserId, User>,
    next_id: UserId,
}

impl Default for Users {
    fn default() -> Self {
        Self::new()
    }
}

impl Users {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, addr: SocketAddr, outbox: mpsc::UnboundedSender<Vec<u8>>) -> UserId {
        let id = self.next_id;
        self.next_id += 1;
        info!("User {} joined the lobby from {}", id, addr);
        self.users.insert(id, User { id, addr, outbox });
        id
    }

    pub fn remove(&mut self, id: UserId) -> bool {
        match self.users.remove(&id) {
            Some(user) => {
                info!("User {} left the lobby", user.id);
                true
            }
            None => false,
        }
    }

    /// Queues a frame for one user; false if the user is gone
    pub fn send_to(&self, id: UserId, message: &LobbyMessage) -> bool {
        self.users
            .get(&id)
            .map(|user| user.outbox.send(message.encode()).is_ok())
            .unwrap_or(false)
    }

    pub fn broadcast(&self, message: &LobbyMessage) {
        let frame = message.encode();
        for user in self.users.values() {
            if user.outbox.send(frame.clone()).is_err() {
                debug!("User {} outbox closed during broadcast", user.id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Shared lobby state handed to every connection task
#[derive(Clone)]
pub struct Lobby {
    users: Arc<Mutex<Users>>,
    queue: Arc<WaitingRoom<UserId>>,
}

impl Default for Lobby {
    fn default() -> Self {
        Self::new()
    }
}

impl Lobby {
    pub fn new() -> Self {
        Self {
            users: Arc::new(Mutex::new(Users::new())),
            queue: Arc::new(WaitingRoom::new(2)),
        }
    }

    pub async fn user_count(&self) -> usize {
        self.users.lock().await.len()
    }

    /// Accepts connections forever; also drives the matchmaker
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!("Lobby listening on {}", listener.local_addr()?);

        {
            let lobby = self.clone();
            tokio::spawn(async move { lobby.run_matchmaker().await });
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            let lobby = self.clone();
            tokio::spawn(async move { lobby.handle_connection(stream, addr).await });
        }
    }

    async fn run_matchmaker(&self) {
        loop {
            let group = self.queue.take().await;
            let [first, second] = group.as_slice() else {
                continue;
            };

            info!("Match! users {} and {}", first, second);
            let users = self.users.lock().await;
            for (player, id) in [(1u8, *first), (2u8, *second)] {
                if !users.send_to(id, &LobbyMessage::Matched { player }) {
                    warn!("User {} left before hearing about its match", id);
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let (reader, mut writer) = stream.into_split();
        let (outbox, mut pending) = mpsc::unbounded_channel::<Vec<u8>>();

        let id = self.users.lock().await.add(addr, outbox);

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = pending.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let mut reader = BufReader::new(reader);
        loop {
            match read_client_message(&mut reader).await {
                Ok(Some(LobbyMessage::Chat(text))) => {
                    debug!("User {} says {:?}", id, text);
                    self.users.lock().await.broadcast(&LobbyMessage::Chat(text));
                }
                Ok(Some(LobbyMessage::MatchToggle)) => {
                    // The matchmaker needs the registry to announce a match,
                    // so holding it here keeps the reply ahead of `Matched!`
                    let users = self.users.lock().await;
                    let queued = self.queue.toggle(id).await;
                    info!("User {} match toggle: {}", id, queued);
                    let reply = if queued {
                        "[System] Matching queue registered."
                    } else {
                        "[System] Matching cancelled."
                    };
                    users.send_to(id, &LobbyMessage::Chat(reply.to_string()));
                }
                Ok(Some(LobbyMessage::Matched { .. })) => {
                    warn!("User {} sent a server-only frame", id);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Lobby read error from user {}: {}", id, e);
                    break;
                }
            }
        }

        self.queue.leave(&id).await;
        self.users.lock().await.remove(id);
        writer_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::lobby::read_server_message;
    use std::time::Duration;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9909".parse().unwrap()
    }

    #[test]
    fn test_users_add_remove() {
        let mut users = Users::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id1 = users.add(test_addr(), tx.clone());
        let id2 = users.add(test_addr(), tx);

        assert_eq!((id1, id2), (1, 2));
        assert_eq!(users.len(), 2);
        assert!(users.remove(id1));
        assert!(!users.remove(id1));
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut users = Users::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        users.add(test_addr(), tx1);
        users.add(test_addr(), tx2);

        users.broadcast(&LobbyMessage::Chat("gg".into()));
        assert_eq!(rx1.try_recv().unwrap(), b"\x01gg\n".to_vec());
        assert_eq!(rx2.try_recv().unwrap(), b"\x01gg\n".to_vec());
    }

    #[test]
    fn test_send_to_missing_user() {
        let users = Users::new();
        assert!(!users.send_to(42, &LobbyMessage::Chat("hi".into())));
        assert!(users.is_empty());
    }

    async fn next_frame(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> LobbyMessage {
        tokio::time::timeout(Duration::from_secs(2), read_server_message(reader))
            .await
            .expect("no frame from lobby")
            .unwrap()
            .expect("lobby closed")
    }

    #[tokio::test]
    async fn test_two_users_get_matched() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Lobby::new().serve(listener));

        let (r1, mut w1) = TcpStream::connect(addr).await.unwrap().into_split();
        let (r2, mut w2) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut r1 = BufReader::new(r1);
        let mut r2 = BufReader::new(r2);

        w1.write_all(&LobbyMessage::MatchToggle.encode()).await.unwrap();
        assert_eq!(
            next_frame(&mut r1).await,
            LobbyMessage::Chat("[System] Matching queue registered.".into())
        );

        w2.write_all(&LobbyMessage::MatchToggle.encode()).await.unwrap();
        assert_eq!(
            next_frame(&mut r2).await,
            LobbyMessage::Chat("[System] Matching queue registered.".into())
        );

        assert_eq!(next_frame(&mut r1).await, LobbyMessage::Matched { player: 1 });
        assert_eq!(next_frame(&mut r2).await, LobbyMessage::Matched { player: 2 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queue_reply_arrives_before_match() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Lobby::new().serve(listener));

        for _ in 0..20 {
            let (r1, mut w1) = TcpStream::connect(addr).await.unwrap().into_split();
            let (r2, mut w2) = TcpStream::connect(addr).await.unwrap().into_split();
            let mut r1 = BufReader::new(r1);
            let mut r2 = BufReader::new(r2);

            // Both toggles race the matchmaker
            w1.write_all(&LobbyMessage::MatchToggle.encode()).await.unwrap();
            w2.write_all(&LobbyMessage::MatchToggle.encode()).await.unwrap();

            let mut players = Vec::new();
            for reader in [&mut r1, &mut r2] {
                assert_eq!(
                    next_frame(reader).await,
                    LobbyMessage::Chat("[System] Matching queue registered.".into())
                );
                match next_frame(reader).await {
                    LobbyMessage::Matched { player } => players.push(player),
                    other => panic!("expected a match, got {:?}", other),
                }
            }
            players.sort();
            assert_eq!(players, vec![1, 2]);
        }
    }

    #[tokio::test]
    async fn test_chat_is_broadcast_and_toggle_cancels() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Lobby::new().serve(listener));

        let (r1, mut w1) = TcpStream::connect(addr).await.unwrap().into_split();
        let (r2, _w2) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut r1 = BufReader::new(r1);
        let mut r2 = BufReader::new(r2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        w1.write_all(&LobbyMessage::Chat("anyone?".into()).encode())
            .await
            .unwrap();
        assert_eq!(next_frame(&mut r1).await, LobbyMessage::Chat("anyone?".into()));
        assert_eq!(next_frame(&mut r2).await, LobbyMessage::Chat("anyone?".into()));

        w1.write_all(&LobbyMessage::MatchToggle.encode()).await.unwrap();
        w1.write_all(&LobbyMessage::MatchToggle.encode()).await.unwrap();
        assert_eq!(
            next_frame(&mut r1).await,
            LobbyMessage::Chat("[System] Matching queue registered.".into())
        );
        assert_eq!(
            next_frame(&mut r1).await,
            LobbyMessage::Chat("[System] Matching cancelled.".into())
        );
    }
}
