mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use parley_api::{RelayContext, RelaySettings};
use parley_core::{
    bootstrap::{init_services, load_config},
    logging,
    models::Identity,
    service::JwtIdentityService,
};

use server::ParleyServer;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Parley real-time chat and voice relay", long_about = None)]
struct Args {
    /// Config file (YAML or TOML); falls back to PARLEY_CONFIG_PATH and ./config.yaml
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server (default)
    Serve,

    /// Sign a token for a user with the configured secret
    IssueToken {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration (fail fast on misconfigurations)
    let config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Serve) {
        Command::IssueToken { id, username } => {
            let jwt = JwtIdentityService::from_config(&config.auth)?;
            println!("{}", jwt.issue(&Identity::new(id, username))?);
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: parley_core::Config) -> Result<()> {
    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Parley server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize collaborators (database and migrations when configured)
    let services = init_services(&config).await?;

    // 4. Shared relay state
    let relay = RelayContext::new(
        services.identity.clone(),
        services.persistence.clone(),
        RelaySettings::from(&config.relay),
    );
    info!(
        default_room = config.relay.default_room_id,
        outbound_buffer = config.relay.outbound_buffer,
        "Session registry initialized"
    );

    ParleyServer::new(config, relay, services.pool).start().await
}
