use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use marketsync_engine::worker::WorkerError;

use crate::config::MarketplaceClientConfig;

/// One page of a seller feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedPage {
    pub items: Vec<serde_json::Value>,
    /// Absent on older endpoints; a short page then marks the end.
    #[serde(default)]
    pub has_more: Option<bool>,
}

/// Time bounds sent with windowed feed requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub modified_from: Option<DateTime<Utc>>,
    pub modified_to: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct MarketplaceClient {
    client: Client,
    config: MarketplaceClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum MarketplaceClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("invalid feed url: {0}")]
    InvalidUrl(String),

    #[error("feed still reports more data after {pages} pages")]
    PageLimitExceeded { pages: u32 },
}

impl From<MarketplaceClientError> for WorkerError {
    fn from(err: MarketplaceClientError) -> Self {
        match &err {
            MarketplaceClientError::HttpError { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN =>
            {
                WorkerError::Auth(err.to_string())
            }
            MarketplaceClientError::HttpError { .. } => WorkerError::Unexpected(err.to_string()),
            MarketplaceClientError::RequestError(e) if e.is_timeout() || e.is_connect() => {
                WorkerError::Transient(err.to_string())
            }
            MarketplaceClientError::RequestError(_) => WorkerError::Unexpected(err.to_string()),
            MarketplaceClientError::MaxRetriesExceeded { .. } => {
                WorkerError::Transient(err.to_string())
            }
            MarketplaceClientError::InvalidUrl(_)
            | MarketplaceClientError::PageLimitExceeded { .. } => {
                WorkerError::Unexpected(err.to_string())
            }
        }
    }
}

impl MarketplaceClient {
    pub fn new(config: MarketplaceClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &MarketplaceClientConfig {
        &self.config
    }

    /// `{base}/v1/sellers/{seller}/{feed...}` with the seller ref escaped as a
    /// single path segment.
    fn feed_url(&self, seller_ref: &str, feed: &str) -> Result<Url, MarketplaceClientError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| MarketplaceClientError::InvalidUrl(format!("{}: {e}", self.config.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| MarketplaceClientError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(["v1", "sellers", seller_ref])
            .extend(feed.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// Every item of a seller feed, following pages until the upstream
    /// reports no more or `max_pages` is reached.
    pub async fn fetch_all(
        &self,
        seller_ref: &str,
        feed: &str,
        token: &str,
        query: FeedQuery,
    ) -> Result<Vec<serde_json::Value>, MarketplaceClientError> {
        let page_size = self.config.page_size.max(1);
        let max_pages = self.config.max_pages.max(1);
        let url = self.feed_url(seller_ref, feed)?;
        let mut page = 1u32;
        let mut items = Vec::new();

        loop {
            let mut params = vec![
                ("page", page.to_string()),
                ("page_size", page_size.to_string()),
            ];
            if let Some(from) = query.modified_from {
                params.push(("modified_from", from.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
            if let Some(to) = query.modified_to {
                params.push(("modified_to", to.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }

            let body = self.request_with_retry(&url, token, &params).await?;
            let count = body.items.len();
            items.extend(body.items);

            let more = body.has_more.unwrap_or(count as u32 >= page_size);
            if !more || count == 0 {
                break;
            }
            if page >= max_pages {
                return Err(MarketplaceClientError::PageLimitExceeded { pages: page });
            }
            page += 1;
        }

        tracing::debug!(feed, seller = seller_ref, pages = page, items = items.len(), "feed fetched");
        Ok(items)
    }

    async fn request_with_retry(
        &self,
        url: &Url,
        token: &str,
        params: &[(&str, String)],
    ) -> Result<FeedPage, MarketplaceClientError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_ms = std::cmp::min(
                    self.config
                        .retry_backoff_ms
                        .saturating_mul(1u64 << attempt.min(16)),
                    30_000,
                );
                tracing::warn!(attempt, backoff_ms, "retrying after backoff");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            let response = match self
                .client
                .get(url.clone())
                .bearer_auth(token)
                .query(params)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(MarketplaceClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response
                    .json::<FeedPage>()
                    .await
                    .map_err(MarketplaceClientError::RequestError);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(MarketplaceClientError::HttpError { status, body });
        }

        Err(MarketplaceClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn test_config(base_url: &str) -> MarketplaceClientConfig {
        MarketplaceClientConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            max_retries: 2,
            page_size: 2,
            retry_backoff_ms: 5,
            max_pages: 10,
        }
    }

    fn orders(ids: &[&str]) -> serde_json::Value {
        let items: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| serde_json::json!({ "order_id": id }))
            .collect();
        serde_json::json!({ "items": items })
    }

    #[tokio::test]
    async fn follows_pages_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders(&["o1", "o2"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders(&["o3"])))
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let items = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2]["order_id"], "o3");
    }

    #[tokio::test]
    async fn has_more_false_stops_on_a_full_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "order_id": "o1" }, { "order_id": "o2" }],
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let items = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn sends_bearer_token_and_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .and(header("authorization", "Bearer tok"))
            .and(query_param("modified_from", "2026-04-01T00:00:00Z"))
            .and(query_param("modified_to", "2026-04-02T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders(&[])))
            .expect(1)
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let query = FeedQuery {
            modified_from: Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()),
            modified_to: Some(Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap()),
        };
        let items = client.fetch_all("S1", "orders", "tok", query).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn retries_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders(&["o1"])))
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let items = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn retries_after_429() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders(&["o1"])))
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let items = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let err = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceClientError::MaxRetriesExceeded { attempts: 3, .. }));
        assert!(matches!(WorkerError::from(err), WorkerError::Transient(_)));
    }

    #[tokio::test]
    async fn unauthorized_fails_fast_as_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .expect(1)
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let err = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(WorkerError::from(err), WorkerError::Auth(_)));
    }

    #[tokio::test]
    async fn other_client_errors_are_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad window"))
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&server.uri())).unwrap();
        let err = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap_err();
        match WorkerError::from(err) {
            WorkerError::Unexpected(msg) => assert!(msg.contains("bad window"), "got: {msg}"),
            other => panic!("expected Unexpected, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn seller_ref_is_escaped_as_one_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/shop%20a%2Fb/finances/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders(&["t1"])))
            .expect(1)
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(test_config(&format!("{}/", server.uri()))).unwrap();
        let items = client
            .fetch_all("shop a/b", "finances/transactions", "tok", FeedQuery::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn endless_has_more_stops_at_page_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sellers/S1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "order_id": "o1" }],
                "has_more": true
            })))
            .expect(3)
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.max_pages = 3;
        let client = MarketplaceClient::new(config).unwrap();
        let err = client
            .fetch_all("S1", "orders", "tok", FeedQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceClientError::PageLimitExceeded { pages: 3 }));
        assert!(matches!(WorkerError::from(err), WorkerError::Unexpected(_)));
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        let client = MarketplaceClient::new(test_config("not a url")).unwrap();
        assert!(matches!(
            client.feed_url("S1", "orders"),
            Err(MarketplaceClientError::InvalidUrl(_))
        ));
    }
}
