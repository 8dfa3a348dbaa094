use clap::Parser;
use log::{error, info};
use server::lobby::Lobby;
use server::rendezvous::RendezvousServer;
use tokio::net::TcpListener;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// IP address to bind both services to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// UDP port of the rendezvous service
    #[clap(short, long, default_value = "8080")]
    rendezvous_port: u16,
    /// TCP port of the lobby
    #[clap(short, long, default_value = "9909")]
    lobby_port: u16,
}

/// Binds both services, then runs them until one fails or Ctrl+C arrives.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    // Bind failures are fatal and end the process here
    let rendezvous =
        RendezvousServer::bind(&format!("{}:{}", args.host, args.rendezvous_port)).await?;
    let listener = TcpListener::bind(format!("{}:{}", args.host, args.lobby_port)).await?;

    let rendezvous_handle = tokio::spawn(async move { rendezvous.run().await });
    let lobby_handle = tokio::spawn(Lobby::new().serve(listener));

    tokio::select! {
        result = rendezvous_handle => {
            match result {
                Ok(Err(e)) => error!("Rendezvous service failed: {}", e),
                Err(e) => error!("Rendezvous task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = lobby_handle => {
            match result {
                Ok(Err(e)) => error!("Lobby failed: {}", e),
                Err(e) => error!("Lobby task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
