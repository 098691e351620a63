//! Background refresh cadences.
//!
//! Two timers drive [`HarvestService::refresh_all`]: a fixed interval that
//! refreshes without touching baselines, and a daily wall-clock time that
//! starts a new baseline epoch. Cycles never overlap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, LocalResult, NaiveTime, TimeZone};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::harvest::HarvestService;

/// The next instant strictly after `now` whose local time is `at`.
///
/// A time skipped by a DST gap runs an hour later that day; an ambiguous
/// time runs at its first occurrence.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        let naive = date.and_time(at);
        let candidate = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(first, _) => Some(first),
            LocalResult::None => tz
                .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest(),
        };
        if let Some(candidate) = candidate {
            if candidate > *now {
                return candidate;
            }
        }
        date = match date.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => return now.clone(),
        };
    }
}

fn until<Tz: TimeZone>(now: &DateTime<Tz>, then: &DateTime<Tz>) -> Duration {
    then.clone()
        .signed_duration_since(now.clone())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Periodic refresh of every watched subject.
pub struct Scheduler {
    service: Arc<HarvestService>,
    refresh_interval: Duration,
    daily_reset_at: NaiveTime,
}

impl Scheduler {
    pub fn new(
        service: Arc<HarvestService>,
        refresh_interval: Duration,
        daily_reset_at: NaiveTime,
    ) -> Self {
        Self {
            service,
            refresh_interval,
            daily_reset_at,
        }
    }

    pub fn from_settings(service: Arc<HarvestService>, settings: &Settings) -> Self {
        Self::new(service, settings.refresh_interval, settings.daily_reset_at)
    }

    /// Run on a background task until the returned handle is shut down.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        SchedulerHandle { shutdown, task }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler started: refresh every {:?}, daily reset at {}",
            self.refresh_interval, self.daily_reset_at
        );
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Advanced only once a reset cycle has run, so a refresh cycle that
        // runs past the reset time delays the reset instead of skipping it.
        let mut next_reset = next_daily_run(&Local::now(), self.daily_reset_at);
        loop {
            debug!("Next daily reset at {}", next_reset);
            let wait = until(&Local::now(), &next_reset);

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.cycle(false).await;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            if Local::now() >= next_reset {
                self.cycle(true).await;
                next_reset = next_daily_run(&Local::now(), self.daily_reset_at);
                // The reset refreshed everything; restart the interval from here.
                ticker.reset();
            }
        }
        info!("Scheduler stopped");
    }

    async fn cycle(&self, reset: bool) {
        let kind = if reset { "daily reset" } else { "refresh" };
        match self.service.refresh_all(reset).await {
            Ok(outcomes) => {
                let failed: Vec<&str> = outcomes
                    .iter()
                    .filter(|o| o.result.is_err())
                    .map(|o| o.subject.as_str())
                    .collect();
                if failed.is_empty() {
                    info!("Scheduled {}: {} subjects refreshed", kind, outcomes.len());
                } else {
                    warn!(
                        "Scheduled {}: {} of {} subjects failed ({})",
                        kind,
                        failed.len(),
                        outcomes.len(),
                        failed.join(", ")
                    );
                }
            }
            Err(e) => warn!("Scheduled {} failed: {}", kind, e),
        }
    }
}

/// Handle to a spawned [`Scheduler`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler, letting a running cycle finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::harvest::testing::{page, rate_limited, raw_item, ScriptedFactory};
    use crate::harvest::Runtime;
    use crate::store::MemoryStore;
    use chrono::{FixedOffset, Utc};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[test]
    fn test_next_daily_run_later_today() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        let at = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert_eq!(
            next_daily_run(&now, at),
            Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_next_daily_run_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        // Exactly at the reset time: the next run is a day later.
        assert_eq!(
            next_daily_run(&now, NaiveTime::MIN),
            Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_daily_run_uses_local_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 10, 23, 0, 0).unwrap();
        let next = next_daily_run(&now, NaiveTime::MIN);
        assert_eq!(next, tz.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap());
        assert_eq!(until(&now, &next), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_interval_refreshes_watched_subjects() {
        let factory = ScriptedFactory::new(|_, _| {
            Ok(page(vec![raw_item("1", 10, 1_700_000_000)], None, false))
        });
        let mut settings = Settings::default();
        settings.store = StoreBackend::Memory;
        settings.source.base_url = "https://example.com".to_string();
        let runtime =
            Runtime::with_factory(&settings, Arc::new(MemoryStore::new()), factory.clone());
        runtime.service.watch("alice").await.unwrap();

        let scheduler = Scheduler::new(
            runtime.service.clone(),
            Duration::from_millis(20),
            NaiveTime::MIN,
        );
        let handle = scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.shutdown().await;

        assert!(factory.fetch_count() >= 2);
        let cached = runtime.service.cached("alice").await.unwrap().unwrap();
        assert_eq!(cached.items.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_runs_after_refresh_that_overran_it() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let views = Arc::new(AtomicU64::new(100));
        let (count, current) = (fetches.clone(), views.clone());
        // Fetches 2 and 3 are rate limited, stretching the first scheduled
        // refresh to ~1.2s.
        let factory = ScriptedFactory::new(move |_, _| {
            let n = count.fetch_add(1, Ordering::SeqCst);
            if n == 1 || n == 2 {
                return Ok(rate_limited());
            }
            let v = current.load(Ordering::SeqCst);
            Ok(page(vec![raw_item("1", v, 1_700_000_000)], None, false))
        });
        let mut settings = Settings::default();
        settings.store = StoreBackend::Memory;
        settings.source.base_url = "https://example.com".to_string();
        settings.escalation.rate_limit_attempts = 5;
        settings.escalation.backoff_base = Duration::from_millis(600);
        settings.escalation.backoff_cap = Duration::from_millis(600);
        let runtime =
            Runtime::with_factory(&settings, Arc::new(MemoryStore::new()), factory.clone());
        runtime.service.watch("alice").await.unwrap();
        runtime.service.refresh("alice", None, false).await.unwrap();
        views.store(200, Ordering::SeqCst);

        let reset_at = (Local::now() + chrono::Duration::milliseconds(700)).time();
        let handle = Scheduler::new(
            runtime.service.clone(),
            Duration::from_millis(300),
            reset_at,
        )
        .spawn();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.shutdown().await;

        let cached = runtime.service.cached("alice").await.unwrap().unwrap();
        assert_eq!(cached.items[0].baseline_views, 200);
        assert_eq!(cached.items[0].change, 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let factory = ScriptedFactory::queue(Vec::new());
        let mut settings = Settings::default();
        settings.store = StoreBackend::Memory;
        let runtime = Runtime::with_factory(&settings, Arc::new(MemoryStore::new()), factory.clone());

        let handle = Scheduler::from_settings(runtime.service.clone(), &settings).spawn();
        handle.shutdown().await;
        assert_eq!(factory.fetch_count(), 0);
    }
}
