use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use marketsync_db::accounts::models::Account;
use marketsync_db::sync::models::{format_cursor, SyncState};

use crate::registry::WorkerRegistry;
use crate::window::{window_for, FirstRunPolicy};

/// One future run as the background loop would perform it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedRun {
    pub account_id: Uuid,
    pub external_account_ref: String,
    pub data_family: String,
    pub run_at: DateTime<Utc>,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
}

/// Projects the next `cycles` runs of every scheduled pair, assuming each
/// projected run succeeds and cycles start every `interval` from `first_cycle_at`.
///
/// Pairs without a `SyncState` yet are projected as first runs. Inactive
/// accounts, disabled families and manual-only families are left out.
/// Output is ordered by run time, then account, then family.
pub fn project_schedule(
    accounts: &[Account],
    states: &[SyncState],
    registry: &WorkerRegistry,
    first_cycle_at: DateTime<Utc>,
    interval: Duration,
    cycles: usize,
    first_run: FirstRunPolicy,
) -> Vec<ProjectedRun> {
    let by_pair: HashMap<(Uuid, String), &SyncState> = states
        .iter()
        .map(|s| ((s.account_id, s.data_family.clone()), s))
        .collect();
    let interval = interval.max(Duration::zero());

    let mut projected = Vec::new();
    for account in accounts.iter().filter(|a| a.active) {
        for worker in registry.scheduled() {
            let family = worker.data_family();
            if !account.wants_family(family) {
                continue;
            }
            let state = by_pair.get(&(account.id, family.to_string())).copied();
            if state.is_some_and(|s| !s.enabled) {
                continue;
            }

            let kind = worker.policy().kind;
            let mut cursor = state.and_then(|s| s.cursor_value.clone());
            for cycle in 0..cycles {
                // Past the representable range there is nothing left to project.
                let Some(run_at) = cycle_start(first_cycle_at, interval, cycle) else {
                    break;
                };
                let window = window_for(&kind, cursor.as_deref(), run_at, first_run);
                projected.push(ProjectedRun {
                    account_id: account.id,
                    external_account_ref: account.external_ref.clone(),
                    data_family: family.to_string(),
                    run_at,
                    window_from: window.from,
                    window_to: window.to,
                });
                cursor = Some(format_cursor(window.to));
            }
        }
    }

    projected.sort_by(|a, b| {
        (a.run_at, &a.external_account_ref, &a.data_family).cmp(&(
            b.run_at,
            &b.external_account_ref,
            &b.data_family,
        ))
    });
    projected
}

fn cycle_start(first: DateTime<Utc>, interval: Duration, cycle: usize) -> Option<DateTime<Utc>> {
    let offset = interval.checked_mul(i32::try_from(cycle).ok()?)?;
    first.checked_add_signed(offset)
}
