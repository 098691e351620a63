//! viewharvest - harvests a subject's content list from a challenge-protected,
//! rate-limited cursor API and tracks how each item's view count moves
//! relative to a periodically reset baseline.
//!
//! The harvest engine lives in [`harvest`]:
//! - [`harvest::session`] - fetch sessions and the session pool
//! - [`harvest::classifier`] - response classification
//! - [`harvest::escalation`] - retry / escalate / abort state machine
//! - [`harvest::walker`] - cursor pagination with dedup and stall detection
//! - [`harvest::normalize`] - raw item normalization and metric parsing
//! - [`harvest::tracker`] - baseline diffing
//! - [`harvest::service`] - single-flight, bounded-concurrency orchestration

pub mod config;
pub mod harvest;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod utils;

pub use config::{Config, Settings};
pub use harvest::{HarvestError, HarvestService};
pub use models::{Item, ItemWithChange};
