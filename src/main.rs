use allocator_governance::api::{create_router, AppState};
use allocator_governance::chain::{RpcAddressTranslator, RpcApprovalLogSource};
use allocator_governance::cli::{Cli, Commands};
use allocator_governance::config::{AppConfig, LoggingConfig};
use allocator_governance::domain::AllocationPathResolver;
use allocator_governance::error::{GovernanceError, Result};
use allocator_governance::persistence::{
    PgApplicationRepository, PgEventStore, PgRefreshIssueStore,
};
use allocator_governance::reconciliation::{
    ApplicationResolver, ApprovalPoller, ApprovalResolver, IssueResolver, PollerSettings,
};
use allocator_governance::service::ApplicationService;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Shared wiring for every subcommand that touches the database
struct Components {
    repository: Arc<PgApplicationRepository>,
    issues: Arc<PgRefreshIssueStore>,
    service: Arc<ApplicationService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(GovernanceError::Validation(errors.join("; ")));
    }

    match cli.command {
        Commands::Serve { port, no_poller } => run_server(config, port, no_poller).await?,
        Commands::PollOnce => run_poll_once(config).await?,
        Commands::Replay { id } => run_replay(config, &id).await?,
        Commands::Migrate => {
            let store =
                PgEventStore::connect(&config.database.url, config.database.max_connections)
                    .await?;
            store.migrate().await?;
        }
    }

    Ok(())
}

async fn build_components(config: &AppConfig) -> Result<Components> {
    let store =
        PgEventStore::connect(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;

    let issues = Arc::new(PgRefreshIssueStore::new(store.pool().clone()));
    let repository = Arc::new(PgApplicationRepository::new(store));
    let resolver = AllocationPathResolver::new(&config.rkh, &config.pathways);
    let service = Arc::new(ApplicationService::new(
        repository.clone(),
        issues.clone(),
        resolver,
        config.rkh.clone(),
    ));

    Ok(Components {
        repository,
        issues,
        service,
    })
}

fn build_poller(config: &AppConfig, components: &Components) -> Result<Arc<ApprovalPoller>> {
    let source = Arc::new(RpcApprovalLogSource::new(&config.poller.rpc_url)?);
    let translator = Arc::new(RpcAddressTranslator::new(config.poller.address_rpc_url())?);

    // Refresh issues take precedence over applications
    let resolvers: Vec<Arc<dyn ApprovalResolver>> = vec![
        Arc::new(IssueResolver::new(components.issues.clone())),
        Arc::new(ApplicationResolver::new(components.repository.clone())),
    ];

    Ok(Arc::new(ApprovalPoller::new(
        source,
        translator,
        resolvers,
        components.service.clone(),
        PollerSettings::from(&config.poller),
    )))
}

async fn run_server(config: AppConfig, port: Option<u16>, no_poller: bool) -> Result<()> {
    let components = build_components(&config).await?;
    let mut state = AppState::new(components.service.clone());

    let poller = if config.poller.enabled && !no_poller {
        let poller = build_poller(&config, &components)?;
        poller.start().await;
        state = state.with_poller(poller.clone());
        Some(poller)
    } else {
        info!("Approval poller disabled");
        None
    };

    let port = port.unwrap_or(config.api.port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("API server listening on port {}", port);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    if let Some(poller) = poller {
        poller.stop().await;
    }
    Ok(())
}

async fn run_poll_once(config: AppConfig) -> Result<()> {
    let components = build_components(&config).await?;
    let poller = build_poller(&config, &components)?;

    let report = poller.poll_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_replay(config: AppConfig, id: &str) -> Result<()> {
    let components = build_components(&config).await?;

    let replayed = components.repository.replay(id).await?;
    let loaded = components.service.get(id).await?;

    if replayed.version() == loaded.version() && replayed.state() == loaded.state() {
        info!(application_id = %id, version = replayed.version(), "replay matches stored snapshot");
    } else {
        warn!(
            application_id = %id,
            replayed_version = replayed.version(),
            loaded_version = loaded.version(),
            "replayed state differs from snapshot-backed load"
        );
    }

    println!("{}", serde_json::to_string_pretty(&replayed.snapshot())?);
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let default_directives = format!(
        "{},allocator_governance=debug,sqlx=warn",
        if config.level.is_empty() { "info" } else { config.level.as_str() }
    );
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    // `rolling::daily` panics if the first file cannot be created, so probe
    // the directory before handing it over.
    let file_layer = config.dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", log_dir, e);
            return None;
        }
        let probe = std::path::Path::new(log_dir).join(".governance_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                let appender = tracing_appender::rolling::daily(log_dir, "allocator-governance.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                // Lives for the whole process
                Box::leak(Box::new(guard));
                eprintln!("Logging to: {}/allocator-governance.log", log_dir);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", log_dir, e);
                None
            }
        }
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
