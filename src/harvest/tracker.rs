//! Baseline-diff tracking.
//!
//! A subject's baseline is the metric each item had at the start of the
//! current epoch. Epochs start on the first harvest and on every reset; in
//! between, each harvest only updates the last observed value.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::error::HarvestResult;
use crate::models::{BaselineRecord, Item, ItemWithChange, SubjectBaseline};
use crate::store::BaselineStore;

/// `current - baseline`, saturating at the bounds of `i64`.
pub fn metric_change(current: u64, baseline: u64) -> i64 {
    let diff = i128::from(current) - i128::from(baseline);
    i64::try_from(diff).unwrap_or(if diff > 0 { i64::MAX } else { i64::MIN })
}

/// Percentage change relative to `baseline`, rounded to two decimals.
///
/// A zero baseline yields 100 for any increase and 0 otherwise.
pub fn change_percent(baseline: u64, change: i64) -> f64 {
    if baseline == 0 {
        return if change > 0 { 100.0 } else { 0.0 };
    }
    let pct = change as f64 / baseline as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Fold one harvest into a subject's baseline.
///
/// Pure: returns the updated document and the annotated items in harvest
/// order. Records for items missing from this harvest are kept as they are.
pub fn apply(
    existing: Option<SubjectBaseline>,
    items: &[Item],
    reset: bool,
    now: DateTime<Utc>,
) -> (SubjectBaseline, Vec<ItemWithChange>) {
    let fresh_epoch = reset || existing.as_ref().map_or(true, SubjectBaseline::is_empty);
    let mut baseline = existing.unwrap_or_else(|| SubjectBaseline::new(now));
    if fresh_epoch {
        baseline.established_at = now;
    }

    let mut annotated = Vec::with_capacity(items.len());
    for item in items {
        let known = if fresh_epoch {
            None
        } else {
            baseline.items.get_mut(&item.id)
        };
        let entry = match known {
            Some(record) => {
                record.observe(item, now);
                let change = metric_change(item.metric, record.baseline_metric);
                ItemWithChange::new(
                    item.clone(),
                    record.baseline_metric,
                    change,
                    change_percent(record.baseline_metric, change),
                )
            }
            None => {
                baseline
                    .items
                    .insert(item.id.clone(), BaselineRecord::establish(item, now));
                ItemWithChange::unchanged(item.clone())
            }
        };
        annotated.push(entry);
    }

    baseline.last_harvested_at = now;
    baseline.last_order = items.iter().map(|item| item.id.clone()).collect();
    (baseline, annotated)
}

/// Applies harvests to persisted baselines. The only writer of the
/// `baselines` namespace.
#[derive(Clone)]
pub struct BaselineTracker {
    store: BaselineStore,
}

impl BaselineTracker {
    pub fn new(store: BaselineStore) -> Self {
        Self { store }
    }

    /// Diff `items` against the subject's baseline and persist the result.
    ///
    /// Callers must serialize calls per subject; the subject document is
    /// read, updated and written back whole.
    pub async fn apply_harvest(
        &self,
        subject: &str,
        items: &[Item],
        reset: bool,
    ) -> HarvestResult<Vec<ItemWithChange>> {
        let existing = self.store.load(subject).await?;
        let (baseline, annotated) = apply(existing, items, reset, Utc::now());
        self.store.save(subject, &baseline).await?;
        debug!(
            "{}: baseline updated ({} records, reset={})",
            subject,
            baseline.items.len(),
            reset
        );
        Ok(annotated)
    }

    pub async fn load(&self, subject: &str) -> HarvestResult<Option<SubjectBaseline>> {
        Ok(self.store.load(subject).await?)
    }

    pub async fn forget(&self, subject: &str) -> HarvestResult<bool> {
        Ok(self.store.delete(subject).await?)
    }
}
