/// pinflow interpreter
///
/// Main entry point for the remote interpreter process. Loads configuration
/// from the environment and serves the control protocol until a client
/// sends KILL.

use pinflow::{config::Config, server::start_server};

/// Application entry point
///
/// Configuration comes from `PINFLOW_*` environment variables
/// (defaults to 127.0.0.1:8079).
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
