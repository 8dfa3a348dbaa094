//! UDP rendezvous service
//!
//! Pairs the first two distinct addresses that send the registration token
//! and tells each one the other's public `ip:port`. Nothing survives a
//! pairing: the waiting list is empty again right after it.

use crate::waiting_room::WaitingRoom;
use log::{debug, error, info, warn};
use shared::protocol::{format_peer_address, MAX_DATAGRAM_SIZE, REGISTER_TOKEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

pub struct RendezvousServer {
    socket: UdpSocket,
    waiting: WaitingRoom<SocketAddr>,
}

impl RendezvousServer {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Rendezvous service listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            waiting: WaitingRoom::new(2),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Registers a datagram's sender; returns the pair once two are waiting
    pub async fn register(&self, data: &[u8], from: SocketAddr) -> Option<(SocketAddr, SocketAddr)> {
        if data != REGISTER_TOKEN {
            debug!("Ignoring {} byte datagram from {}", data.len(), from);
            return None;
        }

        if self.waiting.join(from).await {
            info!("Registered new peer: {}", from);
        }

        match self.waiting.try_take().await?.as_slice() {
            [a, b] => Some((*a, *b)),
            _ => None,
        }
    }

    async fn introduce(&self, to: SocketAddr, peer: SocketAddr) {
        let message = format_peer_address(peer);
        if let Err(e) = self.socket.send_to(message.as_bytes(), to).await {
            error!("Error sending address to {}: {}", to, e);
        }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Rendezvous receive error: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if let Some((a, b)) = self.register(&buffer[..len], from).await {
                info!("Matching {} with {}", a, b);
                self.introduce(a, b).await;
                self.introduce(b, a).await;
            }
        }
    }
}
