use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::records::models::{dedupe_latest, MarketplaceRecord};
use crate::records::repositories::RecordRepository;
use marketsync_common::error::MarketsyncResult;

type RecordKey = (Uuid, String, String);

#[derive(Debug, Clone, Default)]
pub struct MemoryRecordRepository {
    records: Arc<Mutex<HashMap<RecordKey, MarketplaceRecord>>>,
}

impl MemoryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(
        &self,
        account_id: Uuid,
        data_family: &str,
        natural_id: &str,
    ) -> Option<MarketplaceRecord> {
        let records = self.records.lock().await;
        records
            .get(&(account_id, data_family.to_string(), natural_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RecordRepository for MemoryRecordRepository {
    async fn upsert_many(&self, batch: &[MarketplaceRecord]) -> MarketsyncResult<u64> {
        let unique = dedupe_latest(batch);
        let mut records = self.records.lock().await;
        for record in &unique {
            let (account_id, family, natural_id) = record.natural_key();
            records.insert(
                (account_id, family.to_string(), natural_id.to_string()),
                (*record).clone(),
            );
        }
        Ok(unique.len() as u64)
    }

    async fn count(&self, account_id: Uuid, data_family: &str) -> MarketsyncResult<u64> {
        let records = self.records.lock().await;
        Ok(records
            .keys()
            .filter(|(a, f, _)| *a == account_id && f == data_family)
            .count() as u64)
    }
}
