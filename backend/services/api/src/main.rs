mod error;
mod sync;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use marketsync_common::types::ServiceInfo;
use marketsync_config::{init_tracing, AppConfig, EngineConfig};
use marketsync_db::accounts::pg_repository::{PgAccountRepository, PgCredentialRepository};
use marketsync_db::records::pg_repository::PgRecordRepository;
use marketsync_db::sync::pg_repository::PgSyncRepository;
use marketsync_engine::admin::SyncAdmin;
use marketsync_engine::coordinator::RunCoordinator;
use marketsync_engine::credentials::StoredCredentialProvider;
use marketsync_engine::registry::WorkerRegistry;
use marketsync_engine::runner::RunExecutor;
use marketsync_marketplace::client::MarketplaceClient;
use marketsync_marketplace::config::MarketplaceClientConfig;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub admin: Arc<SyncAdmin>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info() -> Json<ServiceInfo> {
    Json(ServiceInfo::new("marketsync-api"))
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .merge(sync::router())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);

    let engine = EngineConfig::from_env().expect("invalid sync engine config");
    tracing::info!(service = "marketsync-api", "starting");

    let pool = marketsync_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("failed to create database pool");

    // Manual triggers execute in this process, so it needs the same workers.
    let mut registry = WorkerRegistry::new();
    match MarketplaceClientConfig::from_env().expect("invalid marketplace config") {
        Some(client_config) => {
            let client = MarketplaceClient::new(client_config).expect("failed to build http client");
            marketsync_marketplace::register_all(
                &mut registry,
                client,
                Arc::new(PgRecordRepository::new(pool.clone())),
            )
            .expect("failed to register workers");
        }
        None => tracing::warn!("MARKETPLACE_BASE_URL not set; manual triggers are unavailable"),
    }

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
    let admin = SyncAdmin::new(
        executor,
        Arc::new(PgAccountRepository::new(pool)),
        engine.cycle_interval,
    );

    let app = build_router(AppState {
        admin: Arc::new(admin),
    });
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}
