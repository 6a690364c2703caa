//! Command-line client for the Labgate gateway.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labgate_client::GatewayClient;
use serde_json::Value;
use tracing::{debug, warn};

/// Labgate CLI - call GitLab operations through a Labgate gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway base URL
    #[arg(long, env = "LABGATE_URL", default_value = "http://localhost:8080")]
    url: String,

    /// GitLab token the session is bound to
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available operations
    Tools,
    /// Invoke an operation with JSON arguments
    Call {
        /// Operation name, e.g. search_repositories
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = GatewayClient::new(args.url);

    let session = client
        .initialize(&args.token)
        .await
        .context("Failed to open a gateway session")?;
    debug!("Opened session {}", session);

    let outcome = run(&client, &session, args.command).await;

    if let Err(e) = client.terminate(&session).await {
        warn!("Failed to terminate session {}: {}", session, e);
    }
    outcome
}

async fn run(client: &GatewayClient, session: &str, command: Command) -> Result<()> {
    match command {
        Command::Tools => {
            for tool in client.list_operations(session).await? {
                println!("{:<24} {}", tool.name, tool.description);
            }
        }
        Command::Call { name, args } => {
            let arguments: Value =
                serde_json::from_str(&args).context("Arguments must be valid JSON")?;
            let result = client.invoke(session, &name, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}
