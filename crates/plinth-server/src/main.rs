//! Plinth Server — Application entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use plinth_db::repository::SurrealTenantRepository;
use plinth_db::{ConnectionRegistry, DbManager, RemoteServer, run_migrations};
use plinth_server::{AppState, ServerConfig, ServerError, router};
use plinth_tenancy::{Collaborators, Provisioner};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plinth-server", about = "Multi-tenant CMS core server")]
struct Cli {
    /// TOML configuration file. Defaults apply when it does not exist.
    #[arg(long, env = "PLINTH_CONFIG", value_name = "PATH", default_value = "plinth.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plinth=info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {
            info!("Plinth server stopped.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Plinth server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    let config = ServerConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), "Starting Plinth server...");

    let directory = DbManager::connect(&config.db).await?;
    run_migrations(directory.client()).await?;
    let tenants = Arc::new(SurrealTenantRepository::new(directory.client().clone()));

    let server = Arc::new(RemoteServer::connect(config.db.clone()).await?);
    let registry = Arc::new(ConnectionRegistry::new(server, config.registry.clone()));

    let collaborators = Collaborators::from_config(&config.tenancy)?;
    let provisioner = Provisioner::new(
        tenants,
        Arc::clone(&registry),
        collaborators,
        config.tenancy.clone(),
        config.auth.clone(),
    );

    if config.admin_token.as_deref().is_none_or(str::is_empty) {
        warn!("No admin_token configured; the admin API will reject every request");
    }
    let app = router(AppState::new(provisioner, config.admin_token.clone()));

    let sweep_every = (config.registry.idle_timeout() / 2).max(Duration::from_secs(1));
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.evict_idle();
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    sweeper.abort();
    served.map_err(ServerError::Io)
}
