use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use marketsync_db::accounts::models::{Account, AccountCredential};
use marketsync_db::records::models::MarketplaceRecord;
use marketsync_db::records::repositories::RecordRepository;
use marketsync_engine::window::Window;
use marketsync_engine::worker::{Worker, WorkerError, WorkerKind, WorkerOutput, WorkerPolicy};

use crate::client::{FeedQuery, MarketplaceClient};
use crate::families::FamilySpec;

/// Fetches one family's feed and upserts it by natural key.
pub struct FeedWorker {
    spec: FamilySpec,
    client: MarketplaceClient,
    store: Arc<dyn RecordRepository>,
}

impl FeedWorker {
    pub fn new(spec: FamilySpec, client: MarketplaceClient, store: Arc<dyn RecordRepository>) -> Self {
        Self {
            spec,
            client,
            store,
        }
    }

    fn to_records(&self, account: &Account, items: Vec<Value>) -> (Vec<MarketplaceRecord>, u64) {
        let synced_at = Utc::now();
        let mut skipped = 0u64;
        let mut records = Vec::with_capacity(items.len());

        for item in items {
            let Some(natural_id) = natural_id(&item, self.spec.natural_key) else {
                tracing::warn!(
                    data_family = self.spec.data_family,
                    account_id = %account.id,
                    key = self.spec.natural_key,
                    "skipping record without natural key"
                );
                skipped += 1;
                continue;
            };
            let source_updated_at = self
                .spec
                .updated_field
                .and_then(|field| item.get(field))
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.with_timezone(&Utc));

            records.push(MarketplaceRecord {
                account_id: account.id,
                data_family: self.spec.data_family.to_string(),
                natural_id,
                payload: item,
                source_updated_at,
                synced_at,
            });
        }
        (records, skipped)
    }
}

/// String or integer identifiers; blanks count as missing.
fn natural_id(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Worker for FeedWorker {
    fn data_family(&self) -> &str {
        self.spec.data_family
    }

    fn policy(&self) -> WorkerPolicy {
        self.spec.policy.clone()
    }

    async fn execute(
        &self,
        account: &Account,
        credential: &AccountCredential,
        window: Window,
    ) -> Result<WorkerOutput, WorkerError> {
        let query = match self.spec.policy.kind {
            WorkerKind::Windowed { .. } => FeedQuery {
                modified_from: Some(window.from),
                modified_to: Some(window.to),
            },
            WorkerKind::Snapshot => FeedQuery::default(),
        };

        let items = self
            .client
            .fetch_all(
                &account.external_ref,
                self.spec.feed,
                &credential.access_token,
                query,
            )
            .await?;
        let fetched = items.len() as u64;

        let (records, skipped) = self.to_records(account, items);
        let stored = if records.is_empty() {
            0
        } else {
            self.store
                .upsert_many(&records)
                .await
                .map_err(|e| WorkerError::Transient(format!("record store: {e}")))?
        };

        Ok(WorkerOutput {
            fetched,
            stored,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use marketsync_db::records::memory::MemoryRecordRepository;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::client::tests::test_config;
    use crate::families;

    fn credential(account: &Account) -> AccountCredential {
        AccountCredential {
            account_id: account.id,
            access_token: "tok".to_string(),
            expires_at: None,
            updated_at: Utc::now(),
        }
    }

    fn window() -> Window {
        let to = Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap();
        Window {
            from: to - Duration::minutes(30),
            to,
        }
    }

    async fn worker(server: &MockServer, spec: FamilySpec, store: &MemoryRecordRepository) -> FeedWorker {
        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        FeedWorker::new(spec, client, Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn refetching_an_overlapping_window_does_not_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .and(query_param("modified_from", "2026-04-10T11:30:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "order_id": "o1", "updated_at": "2026-04-10T11:45:00Z", "total": 10 },
                    { "order_id": "o2", "updated_at": "2026-04-10T11:50:00Z", "total": 20 }
                ],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let store = MemoryRecordRepository::new();
        let worker = worker(&server, families::orders(), &store).await;
        let account = Account::new("S1", "Seller 1");

        let first = worker.execute(&account, &credential(&account), window()).await.unwrap();
        let second = worker.execute(&account, &credential(&account), window()).await.unwrap();

        assert_eq!(first.stored, 2);
        assert_eq!(second.fetched, 2);
        assert_eq!(store.count(account.id, "orders").await.unwrap(), 2);
        let o1 = store.get(account.id, "orders", "o1").await.unwrap();
        assert_eq!(
            o1.source_updated_at,
            Some(Utc.with_ymd_and_hms(2026, 4, 10, 11, 45, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn records_without_natural_key_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/inventory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "sku": "SKU-1", "quantity": 4 },
                    { "sku": "", "quantity": 1 },
                    { "quantity": 9 },
                    { "sku": 1002, "quantity": 0 }
                ],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let store = MemoryRecordRepository::new();
        let worker = worker(&server, families::inventory(), &store).await;
        let account = Account::new("S1", "Seller 1");

        let out = worker
            .execute(&account, &credential(&account), Window::snapshot(Utc::now()))
            .await
            .unwrap();

        assert_eq!(
            out,
            WorkerOutput {
                fetched: 4,
                stored: 2,
                skipped: 2
            }
        );
        assert!(store.get(account.id, "inventory", "1002").await.is_some());
    }

    #[tokio::test]
    async fn snapshot_feeds_send_no_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/listings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [], "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryRecordRepository::new();
        let worker = worker(&server, families::listings(), &store).await;
        let account = Account::new("S1", "Seller 1");
        worker
            .execute(&account, &credential(&account), Window::snapshot(Utc::now()))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0]
            .url
            .query_pairs()
            .all(|(k, _)| k != "modified_from" && k != "modified_to"));
    }

    #[tokio::test]
    async fn expired_token_surfaces_as_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/finances/transactions"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let store = MemoryRecordRepository::new();
        let worker = worker(&server, families::transactions(), &store).await;
        let account = Account::new("S1", "Seller 1");

        let err = worker
            .execute(&account, &credential(&account), window())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Auth(_)));
    }

    #[test]
    fn natural_id_accepts_strings_and_numbers() {
        assert_eq!(natural_id(&serde_json::json!({"id": " a1 "}), "id"), Some("a1".into()));
        assert_eq!(natural_id(&serde_json::json!({"id": 7}), "id"), Some("7".into()));
        assert_eq!(natural_id(&serde_json::json!({"id": null}), "id"), None);
        assert_eq!(natural_id(&serde_json::json!({"id": ["x"]}), "id"), None);
    }
}
