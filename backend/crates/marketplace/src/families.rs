use chrono::Duration;

use marketsync_engine::worker::{WorkerKind, WorkerPolicy};

/// Static description of one upstream feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilySpec {
    pub data_family: &'static str,
    /// Path segment under `/v1/sellers/{seller}/`.
    pub feed: &'static str,
    /// Field holding the record's natural identifier.
    pub natural_key: &'static str,
    /// Field holding the upstream modification time, if the feed has one.
    pub updated_field: Option<&'static str>,
    pub policy: WorkerPolicy,
}

pub fn orders() -> FamilySpec {
    FamilySpec {
        data_family: "orders",
        feed: "orders",
        natural_key: "order_id",
        updated_field: Some("updated_at"),
        policy: WorkerPolicy {
            kind: WorkerKind::windowed(Duration::minutes(30), Duration::days(90)),
            scheduled: true,
        },
    }
}

/// Payouts, fees and refunds settle late, hence the wider overlap.
pub fn transactions() -> FamilySpec {
    FamilySpec {
        data_family: "transactions",
        feed: "finances/transactions",
        natural_key: "transaction_id",
        updated_field: Some("posted_at"),
        policy: WorkerPolicy {
            kind: WorkerKind::windowed(Duration::minutes(60), Duration::days(90)),
            scheduled: true,
        },
    }
}

pub fn messages() -> FamilySpec {
    FamilySpec {
        data_family: "messages",
        feed: "messages",
        natural_key: "message_id",
        updated_field: Some("sent_at"),
        policy: WorkerPolicy {
            kind: WorkerKind::windowed(Duration::minutes(30), Duration::days(30)),
            scheduled: true,
        },
    }
}

pub fn inventory() -> FamilySpec {
    FamilySpec {
        data_family: "inventory",
        feed: "inventory",
        natural_key: "sku",
        updated_field: None,
        policy: WorkerPolicy {
            kind: WorkerKind::Snapshot,
            scheduled: true,
        },
    }
}

/// Full listing catalog; large, so only refreshed on demand.
pub fn listings() -> FamilySpec {
    FamilySpec {
        data_family: "listings",
        feed: "listings",
        natural_key: "listing_id",
        updated_field: Some("updated_at"),
        policy: WorkerPolicy {
            kind: WorkerKind::Snapshot,
            scheduled: false,
        },
    }
}

pub fn all() -> Vec<FamilySpec> {
    vec![orders(), transactions(), messages(), inventory(), listings()]
}
