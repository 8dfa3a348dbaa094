//! Per-tick lockstep session driver
//!
//! [`LockstepGame`] ties the command queue to the simulation without any I/O
//! so it can be driven in memory. [`run_session`] runs it against a live
//! transport at a fixed tick rate and performs the goodbye handshake when the
//! match ends.

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::input::{Intent, IntentSource};
use crate::lockstep::CommandQueue;
use crate::network::{Inbound, ReliableTransport};
use log::{debug, error, info, trace, warn};
use shared::{Command, Outcome, RenderView, Simulation};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};

const SUMMARY_EVERY_TICKS: u32 = 60;
const FINAL_GOODBYE_BURST: usize = 3;

pub struct LockstepGame {
    sim: Simulation,
    queue: CommandQueue,
    local: u8,
    input_delay: u32,
    issued_for: Option<u32>,
}

impl LockstepGame {
    pub fn new(local: u8, input_delay: u32) -> Self {
        Self {
            sim: Simulation::new(),
            queue: CommandQueue::new(input_delay),
            local,
            input_delay,
            issued_for: None,
        }
    }

    pub fn local_id(&self) -> u8 {
        self.local
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Queues a command received from the peer. A peer issuing under our
    /// own identity can never be scheduled, so that is an error.
    pub fn receive(&mut self, command: Command) -> Result<bool, ClientError> {
        if command.issuer == self.local {
            return Err(ClientError::IdentityClash(self.local));
        }
        Ok(self.queue.enqueue(command))
    }

    /// True until the local command for the current tick has been issued
    pub fn wants_input(&self) -> bool {
        self.issued_for != Some(self.sim.tick())
    }

    /// Issues the local command for `tick + input_delay`, once per tick.
    /// The returned command must be sent to the peer.
    pub fn local_command(&mut self, intent: &Intent) -> Option<Command> {
        if !self.wants_input() {
            return None;
        }
        let tick = self.sim.tick();
        self.issued_for = Some(tick);

        let command = intent.to_command(self.local, tick + self.input_delay);
        self.queue.enqueue(command);
        Some(command)
    }

    /// Executes the current tick if every command for it is present
    pub fn advance(&mut self) -> bool {
        if self.sim.is_finished() {
            return false;
        }
        match self.queue.try_advance(self.sim.tick()) {
            Some(commands) => {
                self.sim.step(&commands);
                true
            }
            None => false,
        }
    }

    fn is_over(&self, max_ticks: Option<u32>) -> bool {
        self.sim.is_finished() || max_ticks.is_some_and(|limit| self.sim.tick() >= limit)
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: Outcome,
    pub final_tick: u32,
    pub checksum: u64,
    /// The peer's checksum when it stopped at the same tick
    pub peer_checksum: Option<u64>,
}

impl SessionReport {
    pub fn is_desynced(&self) -> bool {
        self.peer_checksum.is_some_and(|theirs| theirs != self.checksum)
    }
}

pub async fn run_session<I: IntentSource + ?Sized>(
    mut game: LockstepGame,
    transport: ReliableTransport,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    intents: &mut I,
    config: &SessionConfig,
    view: &watch::Sender<RenderView>,
) -> Result<SessionReport, ClientError> {
    info!(
        "Session started as player {} against {}",
        game.local_id(),
        transport.peer()
    );

    let mut ticker = interval(config.tick_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut peer_goodbye = None;
    let mut stalled_frames: u64 = 0;

    while !game.is_over(config.max_ticks) {
        ticker.tick().await;

        // Issue before draining: our command must be on the wire before a clash ends the frame
        if game.wants_input() {
            let intent = intents.sample();
            if let Some(command) = game.local_command(&intent) {
                if let Err(e) = transport.send(command).await {
                    error!("Error sending command for tick {}: {}", command.execution_tick, e);
                }
            }
        }

        while let Ok(message) = inbound.try_recv() {
            match message {
                Inbound::Command(command) => {
                    if let Err(e) = game.receive(command) {
                        error!("{}; ending the session", e);
                        // One more retransmit pass so the peer sees the clash too
                        sleep(config.retransmit_interval).await;
                        transport.shutdown();
                        return Err(e);
                    }
                }
                Inbound::Goodbye { tick, checksum } => peer_goodbye = Some((tick, checksum)),
            }
        }

        if !game.advance() {
            stalled_frames += 1;
            continue;
        }

        let sim = game.simulation();
        view.send_replace(sim.view());
        if sim.tick() % SUMMARY_EVERY_TICKS == 0 {
            debug!(
                "Tick {}: {} projectiles, {} stalled frames, {} pending",
                sim.tick(),
                sim.projectiles().len(),
                stalled_frames,
                transport.pending_len().await
            );
        }
    }

    let sim = game.simulation();
    let final_tick = sim.tick();
    let checksum = sim.checksum();
    info!(
        "Match over at tick {} ({:?}), checksum {:016x}",
        final_tick,
        sim.outcome(),
        checksum
    );

    let peer_goodbye = say_goodbye(
        &transport,
        &mut inbound,
        config,
        (final_tick, checksum),
        peer_goodbye,
    )
    .await;
    for _ in 0..FINAL_GOODBYE_BURST {
        if let Err(e) = transport.send_goodbye(final_tick, checksum).await {
            error!("Error sending goodbye: {}", e);
        }
    }
    transport.shutdown();

    let peer_checksum = match peer_goodbye {
        Some((tick, theirs)) if tick == final_tick => {
            if theirs != checksum {
                warn!(
                    "Desync at tick {}: local {:016x}, peer {:016x}",
                    tick, checksum, theirs
                );
            }
            Some(theirs)
        }
        Some((tick, _)) => {
            warn!("Peer stopped at tick {} but we stopped at {}", tick, final_tick);
            None
        }
        None => None,
    };

    Ok(SessionReport {
        outcome: sim.outcome(),
        final_tick,
        checksum,
        peer_checksum,
    })
}

/// Whether to wait another timeout period with `pending` commands still
/// unacknowledged, given the count when the previous period began
fn keep_lingering(pending: usize, previous: Option<usize>) -> bool {
    pending > 0 && previous.map_or(true, |before| pending < before)
}

/// Repeats our goodbye until the peer's arrives and nothing is pending, or
/// the timeout expires. The timeout is extended while acknowledgements keep
/// draining the pending store, since the peer may still need those commands.
async fn say_goodbye(
    transport: &ReliableTransport,
    inbound: &mut mpsc::UnboundedReceiver<Inbound>,
    config: &SessionConfig,
    (final_tick, checksum): (u32, u64),
    mut peer_goodbye: Option<(u32, u64)>,
) -> Option<(u32, u64)> {
    let mut deadline = Instant::now() + config.goodbye_timeout;
    let mut pending_at_deadline = None;
    let mut resend = interval(config.retransmit_interval);

    loop {
        tokio::select! {
            _ = resend.tick() => {
                if let Err(e) = transport.send_goodbye(final_tick, checksum).await {
                    error!("Error sending goodbye: {}", e);
                }
            }
            message = inbound.recv() => match message {
                Some(Inbound::Goodbye { tick, checksum: theirs }) => peer_goodbye = Some((tick, theirs)),
                Some(Inbound::Command(command)) => {
                    trace!("Ignoring command for tick {} after the match", command.execution_tick);
                }
                None => return peer_goodbye,
            },
            _ = sleep_until(deadline) => {
                let pending = transport.pending_len().await;
                if keep_lingering(pending, pending_at_deadline) {
                    debug!("{} commands still unacknowledged; waiting longer", pending);
                    pending_at_deadline = Some(pending);
                    deadline = Instant::now() + config.goodbye_timeout;
                    continue;
                }
                if pending > 0 {
                    warn!("Leaving with {} unacknowledged commands", pending);
                }
                if peer_goodbye.is_none() {
                    warn!("Peer did not confirm the end of the match");
                }
                return peer_goodbye;
            }
        }

        if peer_goodbye.is_some() && transport.pending_len().await == 0 {
            return peer_goodbye;
        }
    }
}
