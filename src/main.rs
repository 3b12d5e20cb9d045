use clap::Parser;
use tracing_subscriber::EnvFilter;

use chat_relay::config::Cli;
use chat_relay::error::ChatError;
use chat_relay::server::Server;
use chat_relay::storage::{MemoryStore, SqliteStore, Storage};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    let cli = Cli::parse();
    init_tracing(cli.relay.json_logs);

    if let Some(command) = cli.command {
        let Some(path) = &cli.relay.database else {
            return Err(ChatError::Config(
                "administrative commands need --database".to_string(),
            ));
        };
        let mut store = SqliteStore::inspect(path)?;
        for line in command.execute(&mut store)? {
            println!("{line}");
        }
        return Ok(());
    }

    let config = cli.relay.server_config()?;
    let store: Box<dyn Storage> = match &cli.relay.database {
        Some(path) => Box::new(SqliteStore::open(path)?),
        None => {
            tracing::warn!("no --database given, records are kept in memory only");
            Box::new(MemoryStore::new())
        }
    };

    tracing::info!("chat-relay v{} starting", env!("CARGO_PKG_VERSION"));
    let server = Server::bind(config, store).await?;
    server.run().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_relay=info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
