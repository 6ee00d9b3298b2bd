//! Multi-account, multi-family background synchronization engine.
//!
//! Flow per cycle: [`background::BackgroundLoop`] refreshes credentials, then
//! [`scheduler::AccountScheduler`] fans out over active accounts with bounded
//! parallelism. Each (account, family) pair goes through
//! [`runner::RunExecutor`], which takes the pair lock via
//! [`coordinator::RunCoordinator`], computes the fetch window
//! ([`window`]), executes the registered [`worker::Worker`] and records the
//! outcome. [`manual::ManualTrigger`] reuses the same executor so manual and
//! scheduled runs share the lock.

pub mod admin;
pub mod background;
pub mod coordinator;
pub mod credentials;
pub mod manual;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod window;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
