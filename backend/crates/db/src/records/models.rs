use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One upstream record mirrored locally.
///
/// Unique per `(account_id, data_family, natural_id)`; re-fetching the same
/// record overwrites it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceRecord {
    pub account_id: Uuid,
    pub data_family: String,
    pub natural_id: String,
    pub payload: serde_json::Value,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

impl MarketplaceRecord {
    pub fn natural_key(&self) -> (Uuid, &str, &str) {
        (self.account_id, &self.data_family, &self.natural_id)
    }
}

/// Collapses records sharing a natural key; the last occurrence wins and
/// keeps the position of the first. A single multi-row upsert cannot touch
/// the same row twice, and upstream pages may repeat records.
pub fn dedupe_latest(records: &[MarketplaceRecord]) -> Vec<&MarketplaceRecord> {
    let mut slots: HashMap<(Uuid, &str, &str), usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<&MarketplaceRecord> = Vec::with_capacity(records.len());
    for record in records {
        match slots.get(&record.natural_key()) {
            Some(&slot) => out[slot] = record,
            None => {
                slots.insert(record.natural_key(), out.len());
                out.push(record);
            }
        }
    }
    out
}
