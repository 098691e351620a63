//! Canonical harvested item and its change-annotated form.

use serde::{Deserialize, Serialize};

use crate::harvest::normalize::format_metric;

/// A normalized content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Source-assigned item ID. Never empty.
    pub id: String,
    /// Public URL of the item.
    pub url: String,
    /// Cover image URL (may be empty).
    #[serde(default)]
    pub cover: String,
    /// View count.
    #[serde(rename = "views")]
    pub metric: u64,
    /// Creation time as a unix timestamp, 0 when unknown.
    #[serde(default)]
    pub create_time: i64,
}

impl Item {
    pub fn new(id: impl Into<String>, url: impl Into<String>, metric: u64) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            cover: String::new(),
            metric,
            create_time: 0,
        }
    }

    pub fn with_cover(mut self, cover: impl Into<String>) -> Self {
        self.cover = cover.into();
        self
    }

    pub fn with_create_time(mut self, create_time: i64) -> Self {
        self.create_time = create_time;
        self
    }
}

/// An item annotated with its change relative to the subject's baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemWithChange {
    #[serde(flatten)]
    pub item: Item,
    /// Human-readable view count ("12.3K").
    pub views_display: String,
    /// Baseline the change is measured against.
    pub baseline_views: u64,
    /// `metric - baseline`, may be negative.
    pub change: i64,
    /// Change as a percentage of the baseline, two decimals.
    pub change_percent: f64,
}

impl ItemWithChange {
    pub fn new(item: Item, baseline: u64, change: i64, change_percent: f64) -> Self {
        Self {
            views_display: format_metric(item.metric),
            item,
            baseline_views: baseline,
            change,
            change_percent,
        }
    }

    /// An item seen for the first time since the baseline was established.
    pub fn unchanged(item: Item) -> Self {
        let baseline = item.metric;
        Self::new(item, baseline, 0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_serializes_metric_as_views() {
        let item = Item::new("7", "https://example.com/v/7", 12_300).with_create_time(100);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["views"], 12_300);
        assert_eq!(json["createTime"], 100);
        assert!(json.get("metric").is_none());
    }

    #[test]
    fn item_with_change_flattens_item_fields() {
        let item = Item::new("7", "https://example.com/v/7", 1_500);
        let json = serde_json::to_value(ItemWithChange::new(item, 1_000, 500, 50.0)).unwrap();
        assert_eq!(json["id"], "7");
        assert_eq!(json["viewsDisplay"], "1.5K");
        assert_eq!(json["change"], 500);
        assert_eq!(json["changePercent"], 50.0);
    }
}
