//! sockline: TCP echo server built on the per-connection I/O engine.
//!
//! Every accepted client gets its own receive loop; whatever it sends is
//! written straight back. Configuration via CLI arguments or TOML file.

use sockline::config::Config;
use sockline::echo::EchoSink;
use sockline::Server;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_message_size = config.max_message_size,
        max_connections = config.max_connections,
        pending_messages = config.pending_messages,
        "Starting sockline server"
    );

    let server = Server::new(config);

    tokio::select! {
        result = server.run(Arc::new(EchoSink)) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            server.shutdown();
        }
    }

    Ok(())
}
