use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vigil::cli::{self, Cli, Commands, OutputMode};
use vigil::config::{AppConfig, LoggingConfig};
use vigil::coordination::{install_signal_handlers, GracefulShutdown};
use vigil::coordinator::{Collaborators, Pipeline};
use vigil::error::{Result, VigilError};
use vigil::monitor::{HealthMonitor, HttpProber};
use vigil::persistence::{InMemoryCache, InMemoryStore, PostgresStore, Store};
use vigil::services::{HealthServer, HealthState};
use vigil::supervisor::collaborator_from_config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_logging(&config.logging);
            run_daemon(config).await?;
        }
        Commands::Check { json } => {
            init_logging_simple();
            let monitor = HealthMonitor::new(Arc::new(HttpProber::new(&config.monitor)?));
            let rows = cli::check_endpoints(&monitor, &config.endpoints).await;
            cli::print_items(&rows, OutputMode::from_json_flag(json))?;
        }
        Commands::Strategies { json } => {
            init_logging_simple();
            let rows = cli::strategy_rows(&config)?;
            cli::print_items(&rows, OutputMode::from_json_flag(json))?;
        }
        Commands::Validate => {
            init_logging_simple();
            cli::validate_config(&config)?;
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(VigilError::Validation(format!(
            "{} configuration problem(s)",
            errors.len()
        )));
    }

    let store: Arc<dyn Store> = match &config.database {
        Some(db) => {
            let store = PostgresStore::new(&db.url, db.max_connections).await?;
            store.migrate().await?;
            info!("Using PostgreSQL store");
            Arc::new(store)
        }
        None => {
            warn!("No database configured, events are kept in memory only");
            Arc::new(InMemoryStore::new())
        }
    };

    let collaborators = Collaborators {
        prober: Arc::new(HttpProber::new(&config.monitor)?),
        store,
        cache: Arc::new(InMemoryCache::new()),
        escalation: collaborator_from_config(&config.escalation)?,
    };
    let pipeline = Arc::new(Pipeline::build(&config, collaborators).await?);

    let shutdown = Arc::new(GracefulShutdown::new(config.shutdown.clone()));
    install_signal_handlers(Arc::clone(&shutdown));

    let status_server = config.health_port.map(|port| {
        let server = HealthServer::new(Arc::new(HealthState::from_pipeline(&pipeline)), port);
        let token = shutdown.token();
        tokio::spawn(async move {
            if let Err(e) = server.run(token).await {
                error!("Status server failed: {}", e);
            }
        })
    });

    info!("vigil {} started", env!("CARGO_PKG_VERSION"));
    pipeline.run(Arc::clone(&shutdown)).await?;

    if let Some(handle) = status_server {
        let _ = handle.await;
    }
    info!("vigil stopped");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},vigil=debug,sqlx=warn", logging.level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
