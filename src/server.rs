/// Server setup and initialization
///
/// Wires together all components once at startup: storage, registry, AI
/// router, node executor, idempotency store, execution coordinator, cron
/// scheduler and HTTP routes. Everything is passed down as `Arc`; there is
/// no global state.

use crate::{
    ai::{AdapterTable, AiProviderRouter, HttpTransport},
    api::{create_api_router, AppState},
    config::Config,
    runtime::{
        actions::BuiltinActions, engine::ExecutionCoordinator, executor::NodeExecutor, idempotency::IdempotencyStore,
        scheduler::CronSchedulerService,
    },
    workflow::{
        registry::{WorkflowRegistry, WorkflowStore},
        storage::SqliteStore,
    },
};
use anyhow::Result;
use axum::Router;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Build every component and the application state
///
/// Background work (idempotency reaper, cron scheduler) is tied to `shutdown`.
pub async fn build_state(config: &Config, shutdown: CancellationToken) -> Result<AppState> {
    tracing::info!("📋 Initializing storage in {}", config.database.data_dir);
    let storage = SqliteStore::connect(&config.database.data_dir, &config.database.file_name)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new());
    registry
        .init_from_storage(&storage)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🤖 Initializing AI provider router");
    let transport = HttpTransport::new(config.provider_timeout())?;
    let router = Arc::new(AiProviderRouter::new(
        config.ai.providers.clone(),
        AdapterTable::standard(),
        Arc::new(transport),
        config.router_settings(),
    ));

    tracing::info!("⚙️ Initializing node executor");
    let actions = BuiltinActions::new(config.provider_timeout())?;
    let executor = Arc::new(NodeExecutor::standard(Arc::clone(&router), Arc::new(actions), config.executor_settings()));

    let idempotency = Arc::new(IdempotencyStore::new());
    idempotency.spawn_reaper(Duration::from_secs(config.engine.reaper_interval_secs), shutdown.clone());

    tracing::info!("🚀 Initializing execution coordinator");
    let workflows: Arc<dyn WorkflowStore> = registry.clone();
    let coordinator = Arc::new(ExecutionCoordinator::new(
        workflows,
        Arc::new(storage.clone()),
        executor,
        idempotency,
        config.coordinator_settings(),
    ));

    tracing::info!("⏰ Initializing cron scheduler service");
    let scheduler = Arc::new(
        CronSchedulerService::new(Arc::clone(&registry), Arc::clone(&coordinator))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize cron scheduler: {}", e))?,
    );
    scheduler.start().await?;

    let scheduler_for_shutdown = Arc::clone(&scheduler);
    tokio::spawn(async move {
        shutdown.cancelled().await;
        if let Err(e) = scheduler_for_shutdown.stop().await {
            tracing::warn!("⚠️ Failed to stop cron scheduler: {}", e);
        }
    });

    Ok(AppState {
        storage,
        registry,
        coordinator,
        router,
        scheduler: Some(scheduler),
    })
}

/// Create the main Axum application with all routes
pub async fn create_app(config: &Config, shutdown: CancellationToken) -> Result<Router> {
    let state = build_state(config, shutdown).await?;
    tracing::info!("✅ Application initialized successfully");
    Ok(create_api_router(state))
}

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `relayflow=info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relayflow=info"));
    // A subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init();
}

/// Start the HTTP server and run until Ctrl-C
pub async fn start_server(config: Config) -> Result<()> {
    init_tracing();
    tracing::info!("Starting RelayFlow server...");

    let shutdown = CancellationToken::new();
    let app = create_app(&config, shutdown.clone()).await?;

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("🛑 Shutdown signal received");
            signal.cancel();
        })
        .await?;

    Ok(())
}
