use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use marketsync_db::sync::models::parse_cursor;

use crate::worker::WorkerKind;

pub use marketsync_config::FirstRunPolicy;

/// The `[from, to)` range fetched by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    /// Snapshot families have no incremental range.
    pub fn snapshot(now: DateTime<Utc>) -> Self {
        Self { from: now, to: now }
    }

    pub fn span(&self) -> Duration {
        self.to - self.from
    }
}

/// Next incremental window for a windowed family.
///
/// `to` is always `now`. With a parseable cursor, `from = cursor - overlap`;
/// an unparseable cursor is treated as absent. Without a cursor the first-run
/// policy decides how far back to reach, and `from` never precedes
/// `now - initial_lookback`. Negative durations are treated as zero.
pub fn compute_window(
    cursor_value: Option<&str>,
    now: DateTime<Utc>,
    overlap: Duration,
    initial_lookback: Duration,
    first_run: FirstRunPolicy,
) -> Window {
    let overlap = overlap.max(Duration::zero());
    let initial_lookback = initial_lookback.max(Duration::zero());

    let from = match cursor_value.and_then(parse_cursor) {
        Some(cursor) => cursor - overlap,
        None => {
            let floor = now - initial_lookback;
            match first_run {
                FirstRunPolicy::Lookback => floor,
                FirstRunPolicy::OverlapOnly => (now - overlap).max(floor),
            }
        }
    };

    // A cursor ahead of the local clock must not produce an inverted window.
    Window {
        from: from.min(now),
        to: now,
    }
}

/// Window for a worker of the given kind.
pub fn window_for(
    kind: &WorkerKind,
    cursor_value: Option<&str>,
    now: DateTime<Utc>,
    first_run: FirstRunPolicy,
) -> Window {
    match kind {
        WorkerKind::Windowed {
            overlap,
            initial_lookback,
        } => compute_window(cursor_value, now, *overlap, *initial_lookback, first_run),
        WorkerKind::Snapshot => Window::snapshot(now),
    }
}
