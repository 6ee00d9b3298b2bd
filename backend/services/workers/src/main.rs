use std::sync::Arc;

use marketsync_config::{init_tracing, AppConfig, EngineConfig};
use marketsync_db::accounts::pg_repository::{PgAccountRepository, PgCredentialRepository};
use marketsync_db::records::pg_repository::PgRecordRepository;
use marketsync_db::sync::pg_repository::PgSyncRepository;
use marketsync_engine::background::BackgroundLoop;
use marketsync_engine::coordinator::RunCoordinator;
use marketsync_engine::credentials::StoredCredentialProvider;
use marketsync_engine::registry::WorkerRegistry;
use marketsync_engine::runner::RunExecutor;
use marketsync_engine::scheduler::AccountScheduler;
use marketsync_marketplace::client::MarketplaceClient;
use marketsync_marketplace::config::MarketplaceClientConfig;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);

    let engine = EngineConfig::from_env().expect("invalid sync engine config");
    tracing::info!(
        service = "marketsync-workers",
        interval_secs = engine.cycle_interval.as_secs(),
        max_concurrent_accounts = engine.max_concurrent_accounts,
        first_run = %engine.first_run_policy,
        "starting"
    );

    // Each account task needs a connection, plus headroom for heartbeats.
    let max_connections = config
        .db_max_connections
        .max((engine.max_concurrent_accounts as u32).saturating_mul(2));
    let pool = marketsync_db::create_pool(&config.database_url, max_connections)
        .await
        .expect("failed to connect to database");
    marketsync_db::run_migrations(&pool)
        .await
        .expect("failed to apply migrations");

    let mut registry = WorkerRegistry::new();
    match MarketplaceClientConfig::from_env() {
        Ok(Some(client_config)) => {
            tracing::info!(base_url = %client_config.base_url, "marketplace connector configured");
            let client = MarketplaceClient::new(client_config).expect("failed to create marketplace client");
            marketsync_marketplace::register_all(
                &mut registry,
                client,
                Arc::new(PgRecordRepository::new(pool.clone())),
            )
            .expect("failed to register workers");
        }
        Ok(None) => {
            tracing::warn!("MARKETPLACE_BASE_URL not set; cycles will run with no workers");
        }
        Err(e) => {
            panic!("marketplace configuration error (fail-fast): {e}");
        }
    }
    tracing::info!(families = ?registry.families().collect::<Vec<_>>(), "workers registered");

    let coordinator =
        RunCoordinator::from_std(Arc::new(PgSyncRepository::new(pool.clone())), engine.stale_after)
            .expect("invalid stale threshold");
    let executor = RunExecutor::new(
        coordinator,
        Arc::new(registry),
        Arc::new(StoredCredentialProvider::new(Arc::new(
            PgCredentialRepository::new(pool.clone()),
        ))),
        engine.heartbeat_interval,
        engine.first_run_policy,
    );
    let scheduler = AccountScheduler::new(
        executor,
        Arc::new(PgAccountRepository::new(pool)),
        engine.max_concurrent_accounts,
        engine.family_stagger,
    );
    let background = BackgroundLoop::new(scheduler, engine.cycle_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutdown requested; waiting for the current cycle");
        let _ = shutdown_tx.send(true);
    });

    background.run(shutdown_rx).await;
    tracing::info!("shutting down");
}
