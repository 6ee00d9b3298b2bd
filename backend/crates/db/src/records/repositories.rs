use async_trait::async_trait;
use uuid::Uuid;

use crate::records::models::MarketplaceRecord;
use marketsync_common::error::MarketsyncResult;

/// Destination store for fetched records.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Insert or overwrite by natural key. Returns the number of records written.
    async fn upsert_many(&self, records: &[MarketplaceRecord]) -> MarketsyncResult<u64>;

    async fn count(&self, account_id: Uuid, data_family: &str) -> MarketsyncResult<u64>;
}
