//! # Lockstep Duel Client
//!
//! Everything a peer needs to play a match without a game server:
//!
//! ### Lobby (`lobby`)
//! Optional TCP chat room that hands out player numbers when two users
//! queue up.
//!
//! ### Handshake (`handshake`)
//! Registers with the rendezvous service, punches a path through the NAT
//! towards the matched peer and, if no player number was assigned, settles
//! one by comparing random nonces.
//!
//! ### Network (`network`)
//! Reliable transport: sequence numbers, a pending store retransmitted every
//! interval until acknowledged, duplicate suppression on receive and an
//! optional link conditioner for testing under loss and latency.
//!
//! ### Lockstep (`lockstep`) and Game (`game`)
//! Commands are scheduled `input_delay` ticks ahead. A tick only executes
//! once both players' commands for it are present, so both peers run the
//! shared simulation on identical input and never exchange state. When the
//! match ends the peers trade a goodbye carrying a checksum of their final
//! state.
//!
//! ### Input (`input`)
//! The session samples an abstract intent once per tick. The binary feeds it
//! from stdin (`move X Y`, `shoot`).
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::config::SessionConfig;
//! use client::game::{run_session, LockstepGame};
//! use client::handshake::{punch, register};
//! use client::input::{spawn_stdin_lines, InputManager};
//! use client::network::ReliableTransport;
//! use shared::Simulation;
//! use std::sync::Arc;
//! use tokio::net::UdpSocket;
//! use tokio::sync::watch;
//!
//! # async fn demo() -> Result<(), client::error::ClientError> {
//! let config = SessionConfig::default();
//! let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
//! let peer = register(&socket, "127.0.0.1:8080".parse().unwrap()).await?;
//! punch(&socket, peer, 7, &config).await?;
//!
//! let (transport, inbound) = ReliableTransport::start(socket, peer, 1, 7, &config);
//! let (view_tx, _view_rx) = watch::channel(Simulation::new().view());
//! let mut input = InputManager::new(spawn_stdin_lines());
//!
//! let game = LockstepGame::new(1, config.input_delay);
//! let report = run_session(game, transport, inbound, &mut input, &config, &view_tx).await?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod game;
pub mod handshake;
pub mod input;
pub mod lobby;
pub mod lockstep;
pub mod network;
