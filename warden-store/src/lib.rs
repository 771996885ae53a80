//! # Warden Store
//!
//! SQLite-backed persistence for Warden: the incident ledger with its
//! append-only timelines, the raw process event log, and alert history.
//! All access goes through [`IncidentStore`], which opens a fresh
//! connection per operation on the blocking pool and retries lock
//! contention with exponential backoff.

mod schema;
mod store;

pub use store::IncidentStore;
