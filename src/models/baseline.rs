//! Persisted per-subject baseline records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Item, ItemWithChange};

/// Baseline for one (subject, item) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRecord {
    /// Metric at the last baseline epoch (or first sighting).
    pub baseline_metric: u64,
    /// Metric at the most recent harvest that saw this item.
    pub last_observed_metric: u64,
    pub last_updated: DateTime<Utc>,
    /// Last seen presentation fields, used to rebuild cached responses.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub create_time: i64,
}

impl BaselineRecord {
    /// Start a fresh baseline at the item's current metric.
    pub fn establish(item: &Item, now: DateTime<Utc>) -> Self {
        Self {
            baseline_metric: item.metric,
            last_observed_metric: item.metric,
            last_updated: now,
            url: item.url.clone(),
            cover: item.cover.clone(),
            create_time: item.create_time,
        }
    }

    /// Record a new observation; the baseline itself is left alone.
    pub fn observe(&mut self, item: &Item, now: DateTime<Utc>) {
        self.last_observed_metric = item.metric;
        self.last_updated = now;
        self.url = item.url.clone();
        self.cover = item.cover.clone();
        if item.create_time != 0 {
            self.create_time = item.create_time;
        }
    }
}

/// Everything persisted for one subject under the `baselines` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBaseline {
    /// When the current baseline epoch started.
    pub established_at: DateTime<Utc>,
    /// When a harvest was last applied.
    pub last_harvested_at: DateTime<Utc>,
    /// Item ID order of the last applied harvest.
    #[serde(default)]
    pub last_order: Vec<String>,
    pub items: BTreeMap<String, BaselineRecord>,
}

impl SubjectBaseline {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            established_at: now,
            last_harvested_at: now,
            last_order: Vec::new(),
            items: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Rebuild the last known view of this subject from the stored records.
    ///
    /// Items from the last harvest come first in their harvested order; any
    /// older records not seen since follow in ID order.
    pub fn cached_items(&self) -> Vec<ItemWithChange> {
        let mut ids: Vec<&String> = self
            .last_order
            .iter()
            .filter(|id| self.items.contains_key(*id))
            .collect();
        for id in self.items.keys() {
            if !self.last_order.contains(id) {
                ids.push(id);
            }
        }

        ids.into_iter()
            .filter_map(|id| self.items.get(id).map(|record| (id, record)))
            .map(|(id, record)| {
                let item = Item {
                    id: id.clone(),
                    url: record.url.clone(),
                    cover: record.cover.clone(),
                    metric: record.last_observed_metric,
                    create_time: record.create_time,
                };
                let change = crate::harvest::tracker::metric_change(
                    record.last_observed_metric,
                    record.baseline_metric,
                );
                let percent =
                    crate::harvest::tracker::change_percent(record.baseline_metric, change);
                ItemWithChange::new(item, record.baseline_metric, change, percent)
            })
            .collect()
    }
}
