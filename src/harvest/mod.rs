//! Harvest engine.
//!
//! Leaf first: [`session`] fetches pages, [`classifier`] judges responses,
//! [`escalation`] decides whether to retry, escalate or give up, [`walker`]
//! follows the cursor, [`normalize`] turns raw items into [`Item`]s and
//! [`tracker`] diffs them against the stored baseline. [`service`] ties the
//! pieces together for callers.
//!
//! [`Item`]: crate::models::Item

mod bootstrap;
pub mod classifier;
mod error;
pub mod escalation;
pub mod normalize;
pub mod service;
pub mod session;
pub mod tracker;
pub mod walker;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::{build_session_factory, build_store, Runtime};
pub use classifier::{classify, Classification, PagePayload};
pub use error::{FetchError, HarvestError, HarvestResult};
pub use escalation::{ControllerState, EscalationController, EscalationPolicy, Transition};
pub use service::{BusyPolicy, HarvestReport, HarvestService, RefreshOutcome, ServicePolicy};
pub use session::{ChallengeResolver, ManualResolver, SessionMode, SessionPool};
pub use walker::{Harvester, WalkPolicy};
