//! Labgate server.

use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use labgate::{
    config::{CliOverrides, Config},
    create_app, logging,
    mcp::spawn_sweeper,
    state::AppState,
};

/// Labgate - multi-tenant MCP gateway for the GitLab REST API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "LABGATE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "LABGATE_PORT")]
    port: Option<u16>,

    /// GitLab API root, e.g. https://gitlab.example.com/api/v4
    #[arg(long, env = "LABGATE_UPSTREAM_URL")]
    upstream_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(CliOverrides {
        host: args.host,
        port: args.port,
        upstream_url: args.upstream_url,
        log_level: args.log_level,
    })?;

    let _log_guard = logging::init(config.log_level.as_deref(), config.log_file.as_deref())?;
    info!("Starting Labgate {}...", env!("CARGO_PKG_VERSION"));

    let state = AppState::from_config(&config)?;

    let sweeper_cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        state.sessions().clone(),
        config.sessions.sweep_interval,
        config.sessions.idle_timeout,
        sweeper_cancel.clone(),
    );

    let app = create_app(state.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let sessions = state.sessions().clone();
    let settings = config.sessions;
    let shutdown_signal = async move {
        wait_for_signal().await;
        info!("Received shutdown signal, shutting down gracefully...");
        sweeper_cancel.cancel();

        // Hard deadline: outstanding closes do not keep the process alive
        let deadline = settings.shutdown_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!("Shutdown deadline of {}s passed, exiting", deadline.as_secs());
            std::process::exit(0);
        });

        let grace = settings.terminate_grace.min(deadline);
        let closed = sessions.close_all(grace).await;
        info!("Closed {} MCP session(s)", closed);
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .is_err()
    {
        warn!("Session sweeper did not stop in time");
    }
    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
