use marketsync_common::error::MarketsyncResult;
use marketsync_config::env::parse_var_or;

#[derive(Debug, Clone)]
pub struct MarketplaceClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub page_size: u32,
    /// Base of the exponential backoff between retries.
    pub retry_backoff_ms: u64,
    /// Upper bound on pages followed per fetch.
    pub max_pages: u32,
}

impl MarketplaceClientConfig {
    /// Returns `Ok(None)` when `MARKETPLACE_BASE_URL` is unset, so the
    /// workers binary can run with no upstream configured.
    pub fn from_env() -> MarketsyncResult<Option<Self>> {
        let base_url = match std::env::var("MARKETPLACE_BASE_URL") {
            Ok(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_string(),
            _ => return Ok(None),
        };

        Ok(Some(Self {
            base_url,
            timeout_secs: parse_var_or("MARKETPLACE_TIMEOUT_SECS", 30)?,
            max_retries: parse_var_or("MARKETPLACE_MAX_RETRIES", 3)?,
            page_size: parse_var_or("MARKETPLACE_PAGE_SIZE", 100)?,
            retry_backoff_ms: parse_var_or("MARKETPLACE_RETRY_BACKOFF_MS", 1000)?,
            max_pages: parse_var_or("MARKETPLACE_MAX_PAGES", 1000)?,
        }))
    }
}
