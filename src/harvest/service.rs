//! Harvest orchestration: single-flight per subject, bounded concurrency,
//! deadlines, baseline application and cached fallback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tracing::{info, warn};

use super::error::{HarvestError, HarvestResult};
use super::tracker::BaselineTracker;
use super::walker::Harvester;
use crate::models::ItemWithChange;
use crate::store::{BaselineStore, WatchList};

/// What to do when a harvest for the same subject is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait for the running harvest, then run again.
    #[default]
    Queue,
    /// Fail fast with [`HarvestError::Busy`].
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServicePolicy {
    /// Harvests allowed to run at once across subjects.
    pub pool_size: usize,
    pub busy: BusyPolicy,
    /// Wall-clock limit for one harvest, excluding time queued for a slot.
    pub deadline: Duration,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            pool_size: 2,
            busy: BusyPolicy::Queue,
            deadline: Duration::from_secs(180),
        }
    }
}

/// Result of a harvest request, live or rebuilt from stored baselines.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestReport {
    pub subject: String,
    pub scraped_at: DateTime<Utc>,
    pub items: Vec<ItemWithChange>,
    /// True when the items come from stored state after a failed harvest.
    pub cached: bool,
    /// Why the live harvest failed, for cached reports.
    pub error: Option<HarvestError>,
}

/// Outcome of one subject in a refresh-all pass.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub subject: String,
    pub result: Result<usize, HarvestError>,
}

/// Normalize a subject handle: trimmed, leading `@` removed.
pub fn normalize_subject(raw: &str) -> HarvestResult<String> {
    let subject = raw.trim().trim_start_matches('@').trim();
    if subject.is_empty() {
        return Err(HarvestError::InvalidRequest(
            "subject must not be empty".to_string(),
        ));
    }
    if subject.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(HarvestError::InvalidRequest(format!(
            "invalid subject: {}",
            subject
        )));
    }
    Ok(subject.to_string())
}

pub struct HarvestService {
    harvester: Harvester,
    tracker: BaselineTracker,
    watchlist: WatchList,
    policy: ServicePolicy,
    permits: Arc<Semaphore>,
    subject_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl HarvestService {
    pub fn new(
        harvester: Harvester,
        baselines: BaselineStore,
        watchlist: WatchList,
        policy: ServicePolicy,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(policy.pool_size.max(1)));
        Self {
            harvester,
            tracker: BaselineTracker::new(baselines),
            watchlist,
            policy,
            permits,
            subject_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    pub fn transport(&self) -> &'static str {
        self.harvester.pool().transport()
    }

    pub fn default_target_count(&self) -> usize {
        self.harvester.walk_policy().target_count
    }

    pub fn watchlist(&self) -> &WatchList {
        &self.watchlist
    }

    fn subject_lock(&self, subject: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .subject_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn lock_subject(
        &self,
        subject: &str,
        busy: BusyPolicy,
    ) -> HarvestResult<OwnedMutexGuard<()>> {
        let lock = self.subject_lock(subject);
        match busy {
            BusyPolicy::Queue => Ok(lock.lock_owned().await),
            BusyPolicy::Reject => lock
                .try_lock_owned()
                .map_err(|_| HarvestError::Busy(subject.to_string())),
        }
    }

    /// Harvest a subject and fold the result into its baseline.
    ///
    /// Harvest and baseline update run under the subject's lock, so
    /// concurrent requests for one subject apply in order.
    pub async fn refresh(
        &self,
        subject: &str,
        target_count: Option<usize>,
        reset: bool,
    ) -> HarvestResult<HarvestReport> {
        self.refresh_with(subject, target_count, reset, self.policy.busy)
            .await
    }

    async fn refresh_with(
        &self,
        subject: &str,
        target_count: Option<usize>,
        reset: bool,
        busy: BusyPolicy,
    ) -> HarvestResult<HarvestReport> {
        let subject = normalize_subject(subject)?;
        let target_count = target_count
            .filter(|n| *n > 0)
            .unwrap_or_else(|| self.default_target_count());

        let _subject_guard = self.lock_subject(&subject, busy).await?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| HarvestError::Network("harvest pool closed".to_string()))?;

        let items = self
            .harvester
            .harvest_within(&subject, target_count, self.policy.deadline)
            .await?;

        let annotated = self.tracker.apply_harvest(&subject, &items, reset).await?;
        info!("{}: harvested {} items", subject, annotated.len());

        Ok(HarvestReport {
            subject,
            scraped_at: Utc::now(),
            items: annotated,
            cached: false,
            error: None,
        })
    }

    /// On-demand view: watch the subject, harvest it, and fall back to the
    /// last stored state when the harvest fails.
    pub async fn view(
        &self,
        subject: &str,
        target_count: Option<usize>,
    ) -> HarvestResult<HarvestReport> {
        let subject = normalize_subject(subject)?;
        if self.watchlist.add(&subject).await? {
            info!("{}: added to watch list", subject);
        }

        let err = match self.refresh(&subject, target_count, false).await {
            Ok(report) => return Ok(report),
            Err(err) => err,
        };

        match self.cached(&subject).await {
            Ok(Some(mut report)) => {
                warn!("{}: serving cached state after error: {}", subject, err);
                if let Some(limit) = target_count.filter(|n| *n > 0) {
                    report.items.truncate(limit);
                }
                report.error = Some(err);
                Ok(report)
            }
            Ok(None) => Err(err),
            Err(store_err) => {
                warn!("{}: cached state unavailable: {}", subject, store_err);
                Err(err)
            }
        }
    }

    /// Last known state rebuilt from stored baselines.
    pub async fn cached(&self, subject: &str) -> HarvestResult<Option<HarvestReport>> {
        let Some(baseline) = self.tracker.load(subject).await? else {
            return Ok(None);
        };
        if baseline.is_empty() {
            return Ok(None);
        }
        Ok(Some(HarvestReport {
            subject: subject.to_string(),
            scraped_at: baseline.last_harvested_at,
            items: baseline.cached_items(),
            cached: true,
            error: None,
        }))
    }

    /// Refresh every watched subject. Concurrency is bounded by the pool.
    ///
    /// Scheduled passes always queue behind an in-flight harvest of the same
    /// subject, whatever the busy policy, so a daily reset is never skipped.
    pub async fn refresh_all(&self, reset: bool) -> HarvestResult<Vec<RefreshOutcome>> {
        let subjects = self.watchlist.list().await?;
        info!(
            "Refreshing {} watched subjects (reset={})",
            subjects.len(),
            reset
        );

        let outcomes = join_all(subjects.into_iter().map(|subject| async move {
            let result = self
                .refresh_with(&subject, None, reset, BusyPolicy::Queue)
                .await
                .map(|report| report.items.len());
            if let Err(e) = &result {
                warn!("{}: refresh failed: {}", subject, e);
            }
            RefreshOutcome { subject, result }
        }))
        .await;

        Ok(outcomes)
    }

    /// Explicitly start watching a subject.
    pub async fn watch(&self, subject: &str) -> HarvestResult<bool> {
        let subject = normalize_subject(subject)?;
        Ok(self.watchlist.add(&subject).await?)
    }

    pub async fn watched(&self) -> HarvestResult<Vec<String>> {
        Ok(self.watchlist.list().await?)
    }

    /// Stop watching a subject and delete its baselines.
    /// Returns false when the subject was not watched.
    pub async fn remove(&self, subject: &str) -> HarvestResult<bool> {
        let subject = normalize_subject(subject)?;
        let lock = self.subject_lock(&subject);
        let guard = lock.clone().lock_owned().await;

        let removed = self.watchlist.remove(&subject).await?;
        if removed {
            self.tracker.forget(&subject).await?;
            info!("{}: removed from watch list", subject);
        }
        drop(guard);
        self.release_subject_lock(&subject, &lock);
        Ok(removed)
    }

    /// Drop a subject's lock entry unless another caller still holds it.
    fn release_subject_lock(&self, subject: &str, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = self
            .subject_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one held by the caller.
        if Arc::strong_count(lock) == 2 {
            if let Some(current) = locks.get(subject) {
                if Arc::ptr_eq(current, lock) {
                    locks.remove(subject);
                }
            }
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.subject_locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// Close idle sessions.
    pub async fn shutdown(&self) {
        self.harvester.pool().close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::escalation::EscalationPolicy;
    use crate::harvest::session::{FetchTarget, SessionMode, SessionPool};
    use crate::harvest::testing::{
        fast_policy, page, rate_limited, raw_item, source, InstantResolver, ScriptedFactory,
    };
    use crate::harvest::walker::WalkPolicy;
    use crate::store::{MemoryStore, SharedStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn service_with(
        factory: Arc<ScriptedFactory>,
        store: SharedStore,
        policy: ServicePolicy,
        escalation: EscalationPolicy,
    ) -> HarvestService {
        let harvester = Harvester::new(
            Arc::new(SessionPool::new(factory, 2)),
            InstantResolver::new(false),
            Arc::new(source()),
            WalkPolicy::default(),
            escalation,
        );
        HarvestService::new(
            harvester,
            BaselineStore::new(store.clone()),
            WatchList::new(store),
            policy,
        )
    }

    fn service(factory: Arc<ScriptedFactory>) -> HarvestService {
        service_with(
            factory,
            Arc::new(MemoryStore::new()),
            ServicePolicy::default(),
            fast_policy(),
        )
    }

    fn views_source(views: Arc<AtomicUsize>) -> Arc<ScriptedFactory> {
        ScriptedFactory::new(move |_: SessionMode, _: &FetchTarget| {
            let v = views.load(Ordering::SeqCst) as u64;
            Ok(page(vec![raw_item("a", v, 0)], None, false))
        })
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject(" @alice ").unwrap(), "alice");
        assert!(normalize_subject("@").is_err());
        assert!(normalize_subject("a b").is_err());
        assert!(normalize_subject("a/b").is_err());
    }

    #[tokio::test]
    async fn test_view_watches_and_diffs() {
        let views = Arc::new(AtomicUsize::new(100));
        let svc = service(views_source(views.clone()));

        let first = svc.view("@alice", None).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.items[0].change, 0);
        assert_eq!(svc.watched().await.unwrap(), vec!["alice"]);

        views.store(130, Ordering::SeqCst);
        let second = svc.view("alice", None).await.unwrap();
        assert_eq!(second.items[0].change, 30);
        assert_eq!(second.items[0].change_percent, 30.0);

        let reset = svc.refresh("alice", None, true).await.unwrap();
        assert_eq!(reset.items[0].change, 0);
        assert_eq!(reset.items[0].baseline_views, 130);
    }

    #[tokio::test]
    async fn test_view_falls_back_to_cached_state() {
        let fail = Arc::new(AtomicBool::new(false));
        let flag = fail.clone();
        let factory = ScriptedFactory::new(move |_, _| {
            if flag.load(Ordering::SeqCst) {
                Ok(rate_limited())
            } else {
                Ok(page(vec![raw_item("a", 10, 0)], None, false))
            }
        });
        let svc = service(factory);

        svc.view("bob", None).await.unwrap();
        fail.store(true, Ordering::SeqCst);

        let report = svc.view("bob", None).await.unwrap();
        assert!(report.cached);
        assert_eq!(report.items.len(), 1);
        assert!(matches!(
            report.error,
            Some(HarvestError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_view_without_state_surfaces_error() {
        let factory = ScriptedFactory::queue(vec![Ok(crate::harvest::testing::not_found())]);
        let svc = service(factory);

        let err = svc.view("ghost", None).await.unwrap_err();
        assert_eq!(err, HarvestError::SubjectNotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let factory = ScriptedFactory::new(|_, _| Ok(rate_limited()));
        let escalation = EscalationPolicy {
            rate_limit_attempts: 100,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_millis(50),
            ..fast_policy()
        };
        let policy = ServicePolicy {
            deadline: Duration::from_millis(30),
            ..Default::default()
        };
        let svc = service_with(
            factory.clone(),
            Arc::new(MemoryStore::new()),
            policy,
            escalation,
        );

        let err = svc.refresh("alice", None, false).await.unwrap_err();
        assert_eq!(err, HarvestError::DeadlineExceeded(Duration::from_millis(30)));
        // The cancelled session is closed rather than pooled.
        assert_eq!(factory.opened(), vec![SessionMode::Stealth]);
        assert_eq!(factory.closed(), 1);
        assert!(svc.cached("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reject_policy_reports_busy() {
        let factory = ScriptedFactory::new(|_, _| Ok(rate_limited()));
        let escalation = EscalationPolicy {
            rate_limit_attempts: 3,
            backoff_base: Duration::from_millis(40),
            backoff_cap: Duration::from_millis(40),
            ..fast_policy()
        };
        let policy = ServicePolicy {
            busy: BusyPolicy::Reject,
            ..Default::default()
        };
        let svc = Arc::new(service_with(
            factory,
            Arc::new(MemoryStore::new()),
            policy,
            escalation,
        ));

        let running = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.refresh("alice", None, false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = svc.refresh("alice", None, false).await.unwrap_err();
        assert_eq!(err, HarvestError::Busy("alice".to_string()));
        // Other subjects are not blocked.
        assert!(!matches!(
            svc.refresh("bob", None, false).await,
            Err(HarvestError::Busy(_))
        ));
        assert!(running.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_scheduled_reset_queues_behind_busy_subject() {
        // Two rate-limited answers keep the first harvest busy for ~80ms.
        let fetches = Arc::new(AtomicUsize::new(0));
        let views = Arc::new(AtomicUsize::new(100));
        let (count, current) = (fetches.clone(), views.clone());
        let factory = ScriptedFactory::new(move |_, _| {
            if count.fetch_add(1, Ordering::SeqCst) < 2 {
                return Ok(rate_limited());
            }
            let v = current.load(Ordering::SeqCst) as u64;
            Ok(page(vec![raw_item("a", v, 0)], None, false))
        });
        let escalation = EscalationPolicy {
            rate_limit_attempts: 5,
            backoff_base: Duration::from_millis(40),
            backoff_cap: Duration::from_millis(40),
            ..fast_policy()
        };
        let policy = ServicePolicy {
            busy: BusyPolicy::Reject,
            ..Default::default()
        };
        let svc = Arc::new(service_with(
            factory,
            Arc::new(MemoryStore::new()),
            policy,
            escalation,
        ));
        svc.watch("alice").await.unwrap();

        let running = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.view("alice", None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // On-demand callers are still turned away.
        assert_eq!(
            svc.refresh("alice", None, false).await.unwrap_err(),
            HarvestError::Busy("alice".to_string())
        );

        views.store(250, Ordering::SeqCst);
        let outcomes = svc.refresh_all(true).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result, Ok(1));
        assert!(running.await.unwrap().is_ok());

        let cached = svc.cached("alice").await.unwrap().unwrap();
        assert_eq!(cached.items[0].baseline_views, 250);
        assert_eq!(cached.items[0].change, 0);
    }

    #[tokio::test]
    async fn test_remove_releases_subject_lock() {
        let svc = service(views_source(Arc::new(AtomicUsize::new(5))));

        svc.view("alice", None).await.unwrap();
        svc.view("bob", None).await.unwrap();
        assert_eq!(svc.tracked_locks(), 2);

        assert!(svc.remove("alice").await.unwrap());
        assert_eq!(svc.tracked_locks(), 1);
        assert!(!svc.remove("carol").await.unwrap());
        assert_eq!(svc.tracked_locks(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_baselines() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let svc = service_with(
            views_source(Arc::new(AtomicUsize::new(5))),
            store.clone(),
            ServicePolicy::default(),
            fast_policy(),
        );

        svc.view("alice", None).await.unwrap();
        assert!(svc.cached("alice").await.unwrap().is_some());

        assert!(svc.remove("alice").await.unwrap());
        assert!(!svc.remove("alice").await.unwrap());
        assert!(svc.cached("alice").await.unwrap().is_none());
        assert!(svc.watched().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_subject() {
        let svc = service(views_source(Arc::new(AtomicUsize::new(1))));
        svc.watch("alice").await.unwrap();
        svc.watch("bob").await.unwrap();

        let outcomes = svc.refresh_all(false).await.unwrap();
        let mut subjects: Vec<&str> = outcomes.iter().map(|o| o.subject.as_str()).collect();
        subjects.sort();
        assert_eq!(subjects, vec!["alice", "bob"]);
        assert!(outcomes.iter().all(|o| o.result == Ok(1)));
    }
}
