use tracing_subscriber::{fmt, EnvFilter};

/// Filter directive in effect: `RUST_LOG`, then `LOG_LEVEL`, then `default_level`.
fn filter_from_env(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. A second call is a no-op, so both
/// binaries and tests can call it unconditionally.
pub fn init_tracing(default_level: &str) {
    let installed = fmt()
        .with_env_filter(filter_from_env(default_level))
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(default_level, "tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::tests::ENV_LOCK;

    #[test]
    fn rust_log_takes_precedence() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        std::env::set_var("RUST_LOG", "warn");
        std::env::set_var("LOG_LEVEL", "debug");
        assert_eq!(filter_from_env("info").to_string(), "warn");
        std::env::remove_var("RUST_LOG");
        assert_eq!(filter_from_env("info").to_string(), "debug");
        std::env::remove_var("LOG_LEVEL");
        assert_eq!(filter_from_env("info").to_string(), "info");
    }

    #[test]
    fn repeated_init_does_not_panic() {
        init_tracing("info");
        init_tracing("debug");
    }
}
