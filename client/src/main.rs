use clap::Parser;
use client::config::SessionConfig;
use client::game::{run_session, LockstepGame};
use client::handshake::{negotiate_role, punch, register};
use client::input::{spawn_stdin_lines, InputManager};
use client::lobby::run_lobby;
use client::network::{LinkConditioner, ReliableTransport};
use log::info;
use shared::{Outcome, Simulation, INPUT_DELAY};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer lockstep duel client", long_about = None)]
struct Args {
    /// Rendezvous service address
    #[arg(short = 'r', long, default_value = "127.0.0.1:8080")]
    rendezvous: SocketAddr,

    /// Lobby address; when given, chat there and wait for a match first
    #[arg(short = 'l', long)]
    lobby: Option<SocketAddr>,

    /// Force the player number instead of negotiating it
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u8).range(1..=2))]
    player: Option<u8>,

    /// Local UDP address
    #[arg(short = 'b', long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Ticks between issuing and executing a command
    #[arg(long, default_value_t = INPUT_DELAY)]
    input_delay: u32,

    /// Simulation ticks per second
    #[arg(long, default_value_t = 60)]
    tick_rate: u32,

    /// Hole punching probes (3-10)
    #[arg(long, default_value_t = 5)]
    probes: usize,

    /// End the match after this many ticks
    #[arg(long)]
    max_ticks: Option<u32>,

    /// Simulate outbound latency in milliseconds
    #[arg(long, default_value = "0")]
    fake_ping: u64,

    /// Drop this percentage of outbound datagrams
    #[arg(long, default_value = "0")]
    loss: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = SessionConfig {
        input_delay: args.input_delay,
        tick_rate: args.tick_rate,
        probe_count: args.probes,
        max_ticks: args.max_ticks,
        link: LinkConditioner {
            loss_percent: args.loss,
            latency: Duration::from_millis(args.fake_ping),
        },
        ..Default::default()
    }
    .validated()?;

    if config.link.is_enabled() {
        info!(
            "Simulating {}ms latency and {}% loss",
            args.fake_ping, args.loss
        );
    }

    let mut lines = spawn_stdin_lines();

    let mut player = args.player;
    if let Some(lobby) = args.lobby {
        let assigned = run_lobby(lobby, &mut lines).await?;
        player = player.or(Some(assigned));
    }

    let socket = Arc::new(UdpSocket::bind(args.bind).await?);
    info!("Bound UDP socket on {}", socket.local_addr()?);

    let peer = register(&socket, args.rendezvous).await?;
    let nonce: u64 = rand::random();
    punch(&socket, peer, nonce, &config).await?;

    let player = match player {
        Some(player) => player,
        None => negotiate_role(&socket, peer, nonce, config.retransmit_interval).await?,
    };

    info!("Controls: `move X Y` to walk, `shoot` to fire");
    let (transport, inbound) = ReliableTransport::start(socket, peer, player, nonce, &config);
    let (view_tx, _view_rx) = watch::channel(Simulation::new().view());
    let mut input = InputManager::new(lines);

    let game = LockstepGame::new(player, config.input_delay);
    let report = run_session(game, transport, inbound, &mut input, &config, &view_tx).await?;

    match report.outcome {
        Outcome::Finished { winner: Some(winner) } if winner == player => println!("You win!"),
        Outcome::Finished { winner: Some(winner) } => println!("Player {} wins.", winner),
        Outcome::Finished { winner: None } => println!("Draw."),
        Outcome::Running => println!("Match ended at tick {}.", report.final_tick),
    }
    if report.is_desynced() {
        println!("Warning: final state differs from the peer's");
    }

    Ok(())
}
