//! Cursor pagination with dedup and stall detection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::classifier::PagePayload;
use super::error::{HarvestError, HarvestResult};
use super::escalation::{ControllerState, EscalationController, EscalationPolicy};
use super::normalize::{normalize, ItemContext};
use super::session::{ChallengeResolver, FetchTarget, SessionPool};
use crate::config::SourceConfig;
use crate::models::Item;

/// Walk limits.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkPolicy {
    /// Items to collect when the caller does not ask for a count.
    pub target_count: usize,
    /// Consecutive pages without a new item before the walk stops.
    pub stall_threshold: u32,
    /// Hard cap on page requests per walk.
    pub max_iterations: u32,
}

impl Default for WalkPolicy {
    fn default() -> Self {
        Self {
            target_count: 50,
            stall_threshold: 5,
            max_iterations: 40,
        }
    }
}

/// Anything that can turn a page request into a classified payload.
#[async_trait]
pub trait PageFetcher: Send {
    async fn fetch_page(&mut self, target: &FetchTarget) -> HarvestResult<PagePayload>;

    fn state(&self) -> ControllerState;
}

#[async_trait]
impl PageFetcher for EscalationController {
    async fn fetch_page(&mut self, target: &FetchTarget) -> HarvestResult<PagePayload> {
        self.request(target).await
    }

    fn state(&self) -> ControllerState {
        EscalationController::state(self)
    }
}

/// Why a walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    TargetReached,
    NoMorePages,
    Stalled,
    IterationCap,
}

/// Run-time state of one walk. Dropped when the walk ends.
#[derive(Debug)]
pub struct HarvestSession {
    pub mode: ControllerState,
    pub cursor: String,
    collected: Vec<Item>,
    seen: HashSet<String>,
    pub consecutive_stall_count: u32,
    pub iterations: u32,
}

impl HarvestSession {
    pub fn new(start_cursor: &str) -> Self {
        Self {
            mode: ControllerState::Stealth,
            cursor: start_cursor.to_string(),
            collected: Vec::new(),
            seen: HashSet::new(),
            consecutive_stall_count: 0,
            iterations: 0,
        }
    }

    /// Add items not seen before; returns how many were new.
    pub fn absorb(&mut self, items: impl IntoIterator<Item = Item>) -> usize {
        let before = self.collected.len();
        for item in items {
            if self.seen.insert(item.id.clone()) {
                self.collected.push(item);
            }
        }
        self.collected.len() - before
    }

    pub fn len(&self) -> usize {
        self.collected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collected.is_empty()
    }

    /// Final ordering: newest first when every item has a creation time,
    /// otherwise the order the source returned them in.
    pub fn into_items(self, limit: usize) -> Vec<Item> {
        let mut items = self.collected;
        if items.iter().all(|item| item.create_time != 0) {
            items.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        }
        items.truncate(limit);
        items
    }
}

/// Walk a subject's list until a termination condition holds.
pub async fn walk<F: PageFetcher + ?Sized>(
    fetcher: &mut F,
    source: &SourceConfig,
    policy: &WalkPolicy,
    subject: &str,
    target_count: usize,
) -> HarvestResult<Vec<Item>> {
    let ctx = ItemContext { subject, source };
    let mut session = HarvestSession::new(&source.start_cursor);

    let termination = loop {
        if session.iterations >= policy.max_iterations {
            break Termination::IterationCap;
        }
        session.iterations += 1;

        let url = source
            .page_url(subject, &session.cursor)
            .map_err(|e| HarvestError::InvalidRequest(format!("bad source URL: {}", e)))?;
        let target = FetchTarget {
            subject: subject.to_string(),
            cursor: session.cursor.clone(),
            url,
        };

        let page = fetcher.fetch_page(&target).await?;
        session.mode = fetcher.state();

        let raw_count = page.items.len();
        let new_items = session.absorb(page.items.iter().filter_map(|raw| normalize(raw, &ctx)));
        if new_items == 0 {
            session.consecutive_stall_count += 1;
        } else {
            session.consecutive_stall_count = 0;
        }
        debug!(
            "{}: page {} gave {} items ({} new, {} total)",
            subject,
            session.iterations,
            raw_count,
            new_items,
            session.len()
        );

        if session.len() >= target_count {
            break Termination::TargetReached;
        }
        if !page.has_more {
            break Termination::NoMorePages;
        }
        match page.next_cursor {
            Some(cursor) => session.cursor = cursor,
            None => break Termination::NoMorePages,
        }
        if session.consecutive_stall_count >= policy.stall_threshold {
            break Termination::Stalled;
        }
    };

    if session.is_empty() {
        warn!("{}: walk ended ({:?}) with no items", subject, termination);
        return Err(HarvestError::EmptyResult);
    }

    info!(
        "{}: collected {} items in {} pages ({:?}, mode {})",
        subject,
        session.len(),
        session.iterations,
        termination,
        session.mode
    );
    Ok(session.into_items(target_count))
}

/// Runs walks with a fresh escalation controller each time.
pub struct Harvester {
    pool: Arc<SessionPool>,
    resolver: Arc<dyn ChallengeResolver>,
    source: Arc<SourceConfig>,
    walk: WalkPolicy,
    escalation: EscalationPolicy,
}

impl Harvester {
    pub fn new(
        pool: Arc<SessionPool>,
        resolver: Arc<dyn ChallengeResolver>,
        source: Arc<SourceConfig>,
        walk: WalkPolicy,
        escalation: EscalationPolicy,
    ) -> Self {
        Self {
            pool,
            resolver,
            source,
            walk,
            escalation,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn walk_policy(&self) -> &WalkPolicy {
        &self.walk
    }

    /// Harvest a subject. An expired identity restarts the walk once with
    /// a fresh session.
    pub async fn harvest(&self, subject: &str, target_count: usize) -> HarvestResult<Vec<Item>> {
        self.run(subject, target_count, None).await
    }

    /// Harvest under a wall-clock budget covering every walk attempt. On
    /// expiry the session is closed and partial items are discarded.
    pub async fn harvest_within(
        &self,
        subject: &str,
        target_count: usize,
        deadline: Duration,
    ) -> HarvestResult<Vec<Item>> {
        let expires = Instant::now() + deadline;
        self.run(subject, target_count, Some((expires, deadline)))
            .await
    }

    async fn run(
        &self,
        subject: &str,
        target_count: usize,
        deadline: Option<(Instant, Duration)>,
    ) -> HarvestResult<Vec<Item>> {
        match self.walk_once(subject, target_count, deadline).await {
            Err(HarvestError::SessionExpired) => {
                warn!("{}: session expired, restarting harvest", subject);
                self.walk_once(subject, target_count, deadline).await
            }
            other => other,
        }
    }

    async fn walk_once(
        &self,
        subject: &str,
        target_count: usize,
        deadline: Option<(Instant, Duration)>,
    ) -> HarvestResult<Vec<Item>> {
        let mut controller = EscalationController::new(
            subject,
            self.pool.clone(),
            self.resolver.clone(),
            self.source.clone(),
            self.escalation.clone(),
        );
        let walking = walk(
            &mut controller,
            &self.source,
            &self.walk,
            subject,
            target_count,
        );
        let result = match deadline {
            Some((expires, limit)) => {
                let outcome = tokio::time::timeout_at(expires, walking).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("{}: harvest exceeded {:?} deadline", subject, limit);
                        Err(controller
                            .cancel(HarvestError::DeadlineExceeded(limit))
                            .await)
                    }
                }
            }
            None => walking.await,
        };
        controller.finish().await;
        result
    }
}
