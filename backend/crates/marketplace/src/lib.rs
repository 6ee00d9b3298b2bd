//! Marketplace seller API integration: an HTTP client and one feed worker
//! per data family, each upserting into `marketplace_records`.

pub mod client;
pub mod config;
pub mod families;
pub mod feed;

use std::sync::Arc;

use marketsync_common::error::MarketsyncResult;
use marketsync_db::records::repositories::RecordRepository;
use marketsync_engine::registry::WorkerRegistry;

use crate::client::MarketplaceClient;
use crate::feed::FeedWorker;

/// Registers a feed worker for every known family.
pub fn register_all(
    registry: &mut WorkerRegistry,
    client: MarketplaceClient,
    store: Arc<dyn RecordRepository>,
) -> MarketsyncResult<()> {
    for spec in families::all() {
        registry.register(Arc::new(FeedWorker::new(spec, client.clone(), store.clone())))?;
    }
    Ok(())
}
