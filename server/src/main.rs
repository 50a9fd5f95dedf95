use clap::Parser;
use server::network::Server;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of concurrent clients
    #[clap(short, long, default_value = "64")]
    max_clients: usize,
    /// Seconds of silence before a client is considered disconnected
    #[clap(short, long, default_value = "30")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        args.max_clients,
        Duration::from_secs(args.timeout),
    )
    .await?;

    server.run().await?;
    Ok(())
}
