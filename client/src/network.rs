//! Reliable delivery of lockstep commands over a raw UDP socket
//!
//! Three background tasks share one socket:
//! - a receiver that decodes datagrams, acknowledges commands and routes
//!   acknowledgements to the ack path
//! - an ack processor that evicts acknowledged commands from the pending store
//! - a retransmitter that resends everything still pending on a fixed period
//!
//! The pending store lock is never held across socket I/O.

use crate::config::SessionConfig;
use crate::error::ClientError;
use log::{debug, error, trace, warn};
use rand::Rng;
use shared::protocol::MAX_DATAGRAM_SIZE;
use shared::{Command, Packet};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};

/// Commands sent but not yet acknowledged, keyed by sequence number
#[derive(Debug, Default)]
pub struct PendingStore {
    commands: BTreeMap<u32, Command>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, command: Command) {
        self.commands.insert(command.sequence, command);
    }

    /// Evicts `sequence`; returns whether it was still pending
    pub fn acknowledge(&mut self, sequence: u32) -> bool {
        self.commands.remove(&sequence).is_some()
    }

    /// Snapshot of everything awaiting an ack, oldest first
    pub fn outstanding(&self) -> Vec<Command> {
        self.commands.values().copied().collect()
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.commands.contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Sequence numbers already delivered: everything below `floor` plus a
/// sparse set of later arrivals
#[derive(Debug)]
pub struct SeenSequences {
    floor: u32,
    above: BTreeSet<u32>,
}

impl Default for SeenSequences {
    fn default() -> Self {
        Self::new()
    }
}

impl SeenSequences {
    /// Sequence numbers start at 1
    pub fn new() -> Self {
        Self {
            floor: 1,
            above: BTreeSet::new(),
        }
    }

    /// Records `sequence`; false if it was seen before
    pub fn record(&mut self, sequence: u32) -> bool {
        if sequence < self.floor || !self.above.insert(sequence) {
            return false;
        }
        while self.above.remove(&self.floor) {
            self.floor += 1;
        }
        true
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }
}

/// What the transport hands up to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    Goodbye { tick: u32, checksum: u64 },
}

/// Artificial loss and latency applied to outbound datagrams
#[derive(Debug, Clone, Default)]
pub struct LinkConditioner {
    pub loss_percent: f32,
    pub latency: Duration,
}

impl LinkConditioner {
    pub fn is_enabled(&self) -> bool {
        self.loss_percent > 0.0 || !self.latency.is_zero()
    }

    pub fn should_drop(&self) -> bool {
        if self.loss_percent <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_range(0.0..100.0) < self.loss_percent
    }
}

/// Outbound half shared by the session and the background tasks
#[derive(Clone)]
struct Link {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    conditioner: LinkConditioner,
}

impl Link {
    async fn send(&self, packet: &Packet) -> Result<(), ClientError> {
        let data = packet.encode()?;

        if self.conditioner.should_drop() {
            trace!("Link conditioner dropped {:?}", packet);
            return Ok(());
        }

        if self.conditioner.latency.is_zero() {
            self.socket.send_to(&data, self.peer).await?;
            return Ok(());
        }

        let socket = Arc::clone(&self.socket);
        let peer = self.peer;
        let latency = self.conditioner.latency;
        tokio::spawn(async move {
            sleep(latency).await;
            if let Err(e) = socket.send_to(&data, peer).await {
                error!("Error sending delayed datagram to {}: {}", peer, e);
            }
        });
        Ok(())
    }
}

pub struct ReliableTransport {
    link: Link,
    local_issuer: u8,
    next_sequence: AtomicU32,
    pending: Arc<Mutex<PendingStore>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReliableTransport {
    /// Spawns the background tasks and returns the transport together with
    /// the channel of inbound commands and goodbyes
    pub fn start(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        local_issuer: u8,
        nonce: u64,
        config: &SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let link = Link {
            socket,
            peer,
            conditioner: config.link.clone(),
        };
        let pending = Arc::new(Mutex::new(PendingStore::new()));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            spawn_receiver(link.clone(), local_issuer, nonce, inbound_tx, ack_tx),
            spawn_ack_processor(Arc::clone(&pending), ack_rx),
            spawn_retransmitter(link.clone(), Arc::clone(&pending), config.retransmit_interval),
        ];

        let transport = Self {
            link,
            local_issuer,
            next_sequence: AtomicU32::new(1),
            pending,
            tasks,
        };
        (transport, inbound_rx)
    }

    pub fn peer(&self) -> SocketAddr {
        self.link.peer
    }

    pub fn local_issuer(&self) -> u8 {
        self.local_issuer
    }

    /// Assigns the next sequence number and sends `command` until acknowledged
    pub async fn send(&self, mut command: Command) -> Result<u32, ClientError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        command.sequence = sequence;

        // Stored first so an ack racing the send cannot be missed
        self.pending.lock().await.insert(command);
        self.link.send(&Packet::Command(command)).await?;
        trace!("Sent command #{} for tick {}", sequence, command.execution_tick);
        Ok(sequence)
    }

    /// Sends one unreliable goodbye; the session repeats it on a timer
    pub async fn send_goodbye(&self, tick: u32, checksum: u64) -> Result<(), ClientError> {
        self.link.send(&Packet::Goodbye { tick, checksum }).await
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Background tasks that have not exited yet
    pub fn running_tasks(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Stops the background tasks; the socket stays open for its other owners
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ReliableTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_receiver(
    link: Link,
    local_issuer: u8,
    nonce: u64,
    inbound: mpsc::UnboundedSender<Inbound>,
    acks: mpsc::UnboundedSender<u32>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let mut seen = SeenSequences::new();

        loop {
            let (len, from) = match link.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Error receiving datagram: {}", e);
                    sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if from != link.peer {
                warn!("Ignoring datagram from unexpected sender {}", from);
                continue;
            }

            let packet = match Packet::decode(&buffer[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Dropping undecodable datagram from {}: {}", from, e);
                    continue;
                }
            };

            match packet {
                Packet::Command(command) if command.is_ack() => {
                    if acks.send(command.sequence).is_err() {
                        break;
                    }
                }
                Packet::Command(command) => {
                    let ack = Packet::Command(Command::ack(local_issuer, command.sequence));
                    if let Err(e) = link.send(&ack).await {
                        error!("Error acknowledging #{}: {}", command.sequence, e);
                    }

                    if seen.record(command.sequence) {
                        if inbound.send(Inbound::Command(command)).is_err() {
                            break;
                        }
                    } else {
                        trace!("Duplicate command #{} re-acknowledged", command.sequence);
                    }
                }
                Packet::Probe { reply: false, .. } => {
                    if let Err(e) = link.send(&Packet::Probe { nonce, reply: true }).await {
                        error!("Error answering probe: {}", e);
                    }
                }
                Packet::Probe { reply: true, .. } => {}
                Packet::Goodbye { tick, checksum } => {
                    if inbound.send(Inbound::Goodbye { tick, checksum }).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Receiver for {} stopped: session closed", link.peer);
    })
}

fn spawn_ack_processor(
    pending: Arc<Mutex<PendingStore>>,
    mut acks: mpsc::UnboundedReceiver<u32>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(sequence) = acks.recv().await {
            if pending.lock().await.acknowledge(sequence) {
                trace!("Command #{} acknowledged", sequence);
            }
        }
    })
}

fn spawn_retransmitter(
    link: Link,
    pending: Arc<Mutex<PendingStore>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            ticker.tick().await;

            let outstanding = pending.lock().await.outstanding();
            if outstanding.is_empty() {
                continue;
            }

            debug!("Retransmitting {} pending commands", outstanding.len());
            for command in outstanding {
                if let Err(e) = link.send(&Packet::Command(command)).await {
                    error!("Error retransmitting #{}: {}", command.sequence, e);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_store_shrinks_on_ack() {
        let mut store = PendingStore::new();
        for sequence in 1..=3 {
            let mut command = Command::idle(1, sequence + 4);
            command.sequence = sequence;
            store.insert(command);
        }

        assert_eq!(store.len(), 3);
        assert!(store.acknowledge(2));
        assert!(!store.acknowledge(2));
        assert!(!store.contains(2));

        let remaining: Vec<u32> = store.outstanding().iter().map(|c| c.sequence).collect();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn test_seen_sequences_detects_duplicates() {
        let mut seen = SeenSequences::new();
        assert!(seen.record(1));
        assert!(seen.record(3));
        assert!(!seen.record(3));
        assert_eq!(seen.floor(), 2);

        assert!(seen.record(2));
        assert_eq!(seen.floor(), 4);
        assert!(!seen.record(1));
        assert!(!seen.record(2));
    }

    #[test]
    fn test_default_link_is_clean() {
        let link = LinkConditioner::default();
        assert!(!link.is_enabled());
        assert!((0..100).all(|_| !link.should_drop()));
    }

    #[test]
    fn test_total_loss_drops_everything() {
        let link = LinkConditioner {
            loss_percent: 100.0,
            latency: Duration::ZERO,
        };
        assert!(link.is_enabled());
        assert!((0..100).all(|_| link.should_drop()));
    }

    async fn transport_pair(
        config: &SessionConfig,
    ) -> (
        (ReliableTransport, mpsc::UnboundedReceiver<Inbound>),
        (ReliableTransport, mpsc::UnboundedReceiver<Inbound>),
    ) {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();
        (
            ReliableTransport::start(a, b_addr, 1, 10, config),
            ReliableTransport::start(b, a_addr, 2, 20, config),
        )
    }

    async fn wait_for_empty(transport: &ReliableTransport) {
        for _ in 0..100 {
            if transport.pending_len().await == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("pending store never drained");
    }

    #[tokio::test]
    async fn test_commands_are_delivered_and_acknowledged() {
        let config = SessionConfig::default();
        let ((a, _a_rx), (_b, mut b_rx)) = transport_pair(&config).await;

        let first = a.send(Command::move_to(1, 5, 320_000, 240_000)).await.unwrap();
        let second = a.send(Command::shoot(1, 6)).await.unwrap();
        assert_eq!((first, second), (1, 2));

        for expected in [first, second] {
            match tokio::time::timeout(Duration::from_secs(1), b_rx.recv()).await {
                Ok(Some(Inbound::Command(command))) => assert_eq!(command.sequence, expected),
                other => panic!("unexpected {:?}", other),
            }
        }

        wait_for_empty(&a).await;
    }

    #[tokio::test]
    async fn test_retransmission_recovers_after_loss() {
        let lossy = SessionConfig {
            retransmit_interval: Duration::from_millis(20),
            link: LinkConditioner {
                loss_percent: 50.0,
                latency: Duration::ZERO,
            },
            ..Default::default()
        };
        let ((a, _a_rx), (_b, mut b_rx)) = transport_pair(&lossy).await;

        for tick in 5..15 {
            a.send(Command::idle(1, tick)).await.unwrap();
        }

        let mut ticks = BTreeSet::new();
        while ticks.len() < 10 {
            match tokio::time::timeout(Duration::from_secs(5), b_rx.recv()).await {
                Ok(Some(Inbound::Command(command))) => {
                    // Each sequence is forwarded once despite retransmits
                    assert!(ticks.insert(command.execution_tick));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_receiver_stops_once_session_is_gone() {
        let config = SessionConfig::default();
        let ((a, _a_rx), (b, b_rx)) = transport_pair(&config).await;
        assert_eq!(b.running_tasks(), 3);
        drop(b_rx);

        a.send(Command::idle(1, 5)).await.unwrap();

        // Receiver exits, which closes the ack channel and ends the processor;
        // only the retransmitter is left
        for _ in 0..100 {
            if b.running_tasks() == 1 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("receiver kept running after the session was dropped");
    }

    #[tokio::test]
    async fn test_pending_never_grows_while_retransmitting() {
        let lossy = SessionConfig {
            retransmit_interval: Duration::from_millis(10),
            link: LinkConditioner {
                loss_percent: 40.0,
                latency: Duration::ZERO,
            },
            ..Default::default()
        };
        let ((a, _a_rx), (_b, _b_rx)) = transport_pair(&lossy).await;

        for tick in 5..35 {
            a.send(Command::idle(1, tick)).await.unwrap();
        }

        let mut previous = a.pending_len().await;
        assert!(previous <= 30);
        for _ in 0..500 {
            let now = a.pending_len().await;
            assert!(now <= previous, "pending grew from {} to {}", previous, now);
            previous = now;
            if now == 0 {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("pending store never drained, {} left", previous);
    }

    #[tokio::test]
    async fn test_goodbye_and_probe_handling() {
        let config = SessionConfig::default();
        let ((a, _a_rx), (_b, mut b_rx)) = transport_pair(&config).await;

        a.send_goodbye(300, 0xfeed).await.unwrap();
        match tokio::time::timeout(Duration::from_secs(1), b_rx.recv()).await {
            Ok(Some(Inbound::Goodbye { tick, checksum })) => {
                assert_eq!((tick, checksum), (300, 0xfeed));
            }
            other => panic!("unexpected {:?}", other),
        }

        // An unsolicited probe gets a reply carrying the transport's nonce
        let probe_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = probe_socket.local_addr().unwrap();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let (_c, _c_rx) = ReliableTransport::start(socket.clone(), target, 1, 77, &config);

        let probe = Packet::Probe { nonce: 5, reply: false }.encode().unwrap();
        probe_socket
            .send_to(&probe, socket.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), probe_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            Packet::decode(&buf[..len]).unwrap(),
            Packet::Probe { nonce: 77, reply: true }
        );
    }
}
