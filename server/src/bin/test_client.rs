use bincode::{deserialize, serialize};
use clap::Parser;
use shared::Packet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Headless client for exercising the race server: starts a session,
/// "plays" for a moment, submits a score and prints the resulting board.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Player name
    #[clap(short, long, default_value = "TestDriver")]
    name: String,
    /// Player phone (identity key)
    #[clap(long, default_value = "5550100")]
    phone: String,
    /// Reaction time to report, in milliseconds
    #[clap(short, long, default_value = "215")]
    reaction: u32,
    /// Car number (1-99)
    #[clap(short, long, default_value = "7")]
    car: u32,
}

async fn round_trip(
    socket: &UdpSocket,
    server: SocketAddr,
    request: &Packet,
) -> Result<Packet, Box<dyn std::error::Error>> {
    socket.send_to(&serialize(request)?, server).await?;

    let mut buffer = [0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer)).await??;
    Ok(deserialize(&buffer[..len])?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let server_addr = args.server.parse::<SocketAddr>()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    // Start a session
    let response = round_trip(&socket, server_addr, &Packet::StartSession).await?;
    let (game_token, session_id) = match response {
        Packet::SessionStarted {
            game_token,
            server_timestamp,
            session_id,
        } => {
            println!("Session {} started at {}", session_id, server_timestamp);
            (game_token, session_id)
        }
        other => {
            eprintln!("Unexpected response to StartSession: {:?}", other);
            return Ok(());
        }
    };

    // Pretend to race
    sleep(Duration::from_millis(50)).await;

    // Submit the score
    let response = round_trip(
        &socket,
        server_addr,
        &Packet::SubmitScore {
            name: args.name.clone(),
            phone: args.phone.clone(),
            reaction_time_ms: args.reaction,
            car_number: args.car,
            game_token,
        },
    )
    .await?;

    match response {
        Packet::ScoreAccepted {
            leaderboard,
            position,
            is_current_time,
        } => {
            match position {
                Some(p) => println!(
                    "Score accepted: position {} (current time: {})",
                    p, is_current_time
                ),
                None => println!("Score accepted but did not make the board"),
            }
            println!("Leaderboard:");
            for (idx, entry) in leaderboard.iter().enumerate() {
                println!(
                    "  {}. {} - {}ms (car #{})",
                    idx + 1,
                    entry.name,
                    entry.reaction_time_ms,
                    entry.car_number
                );
            }
        }
        Packet::Rejected {
            category,
            message,
            retry_after_ms,
        } => {
            eprintln!(
                "Submission rejected ({:?}): {} (retry after {:?}ms) [session {}]",
                category, message, retry_after_ms, session_id
            );
        }
        other => eprintln!("Unexpected response to SubmitScore: {:?}", other),
    }

    Ok(())
}
