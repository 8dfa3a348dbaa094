//! # Rendezvous and Lobby Server
//!
//! The only piece of infrastructure two players need before they can talk
//! to each other directly. It never sees gameplay traffic.
//!
//! ## Rendezvous (`rendezvous`)
//! A UDP service that learns each client's public address from the source of
//! its registration datagram, pairs the first two distinct registrants, and
//! sends each one the other's `ip:port`. The clients then punch through
//! their NATs and run the match peer-to-peer.
//!
//! ## Lobby (`lobby`)
//! A TCP chat room with a matchmaking queue. Users toggle themselves in and
//! out of the queue; a matchmaker task pairs them and announces who is
//! Player 1 and who is Player 2. The announcement is what moves a client
//! from the lobby into the rendezvous and lockstep session.
//!
//! ## Waiting Room (`waiting_room`)
//! The barrier queue both services pair through: distinct tokens wait in
//! arrival order and are drained atomically in groups of two.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::lobby::Lobby;
//! use server::rendezvous::RendezvousServer;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rendezvous = RendezvousServer::bind("0.0.0.0:8080").await?;
//!     let listener = TcpListener::bind("0.0.0.0:9909").await?;
//!
//!     tokio::spawn(Lobby::new().serve(listener));
//!     rendezvous.run().await?;
//!     Ok(())
//! }
//! ```

pub mod lobby;
pub mod rendezvous;
pub mod waiting_room;
