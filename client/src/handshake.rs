//! Rendezvous registration, hole punching and role negotiation
//!
//! All three run on the session's socket before the reliable transport
//! starts, so they read the socket directly.

use crate::config::SessionConfig;
use crate::error::ClientError;
use log::{debug, info, trace, warn};
use shared::protocol::{parse_peer_address, MAX_DATAGRAM_SIZE, REGISTER_TOKEN};
use shared::Packet;
use std::cmp::Ordering;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// Registers with the rendezvous service and waits for the matched peer's
/// public address. Blocks until a peer shows up.
pub async fn register(socket: &UdpSocket, rendezvous: SocketAddr) -> Result<SocketAddr, ClientError> {
    socket.send_to(REGISTER_TOKEN, rendezvous).await?;
    info!("Registered with rendezvous service at {}", rendezvous);

    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Error waiting for rendezvous reply: {}", e);
                continue;
            }
        };

        // The peer may start punching before our own reply arrives
        if from != rendezvous {
            trace!("Ignoring early datagram from {}", from);
            continue;
        }

        match parse_peer_address(&buffer[..len]) {
            Ok(peer) => {
                info!("Matched with peer {}", peer);
                return Ok(peer);
            }
            Err(e) => warn!("Ignoring rendezvous reply: {}", e),
        }
    }
}

/// Fires the probe burst that opens the NAT mapping towards `peer`
pub async fn punch(
    socket: &UdpSocket,
    peer: SocketAddr,
    nonce: u64,
    config: &SessionConfig,
) -> Result<(), ClientError> {
    let probe = Packet::Probe { nonce, reply: false }.encode()?;

    for i in 0..config.probe_count {
        if i > 0 {
            sleep(config.probe_interval).await;
        }
        socket.send_to(&probe, peer).await?;
    }
    debug!("Sent {} probes to {}", config.probe_count, peer);
    Ok(())
}

/// The lower nonce plays as participant 1
pub fn role_from_nonces(local: u64, remote: u64) -> Result<u8, ClientError> {
    match local.cmp(&remote) {
        Ordering::Less => Ok(1),
        Ordering::Greater => Ok(2),
        Ordering::Equal => Err(ClientError::RoleConflict(local)),
    }
}

/// Exchanges nonces with `peer` until one of its probes arrives
pub async fn negotiate_role(
    socket: &UdpSocket,
    peer: SocketAddr,
    nonce: u64,
    period: Duration,
) -> Result<u8, ClientError> {
    let probe = Packet::Probe { nonce, reply: false }.encode()?;
    let reply = Packet::Probe { nonce, reply: true }.encode()?;
    let mut ticker = interval(period);
    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                socket.send_to(&probe, peer).await?;
            }
            received = socket.recv_from(&mut buffer) => {
                let (len, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Error during role negotiation: {}", e);
                        continue;
                    }
                };
                if from != peer {
                    continue;
                }

                match Packet::decode(&buffer[..len]) {
                    Ok(Packet::Probe { nonce: theirs, reply: answered }) => {
                        if !answered {
                            socket.send_to(&reply, peer).await?;
                        }
                        let role = role_from_nonces(nonce, theirs)?;
                        info!("Negotiated role: player {}", role);
                        return Ok(role);
                    }
                    Ok(other) => trace!("Ignoring {:?} before roles are settled", other),
                    Err(e) => warn!("Dropping undecodable datagram: {}", e),
                }
            }
        }
    }
}
