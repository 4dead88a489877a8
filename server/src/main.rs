use clap::Parser;
use log::error;
use server::config::ServerConfig;
use server::network::Server;
use server::store::MemoryStore;
use server::submission::SubmissionPipeline;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, then starts the race server.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Development mode (relaxed secret/admin requirements)
        #[clap(long)]
        dev: bool,
        /// Leaderboard capacity (top N entries kept)
        #[clap(long, default_value = "3")]
        capacity: usize,
        /// Cleanup sweep interval in seconds
        #[clap(long, default_value = "300")]
        sweep_secs: u64,
    }

    env_logger::init();
    let args = Args::parse();

    let config = {
        let mut config = match ServerConfig::from_env(args.dev) {
            Ok(config) => config,
            Err(e) => {
                error!("configuration error: {}", e);
                return Err(e.into());
            }
        };
        config.leaderboard_capacity = args.capacity;
        config
    };

    let pipeline = SubmissionPipeline::new(&config, MemoryStore::shared());

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, pipeline, Duration::from_secs(args.sweep_secs)).await?;
    let control = server.control_handle();

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server loop failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(server::network::ServerMessage::Shutdown);
        }
    }

    Ok(())
}
