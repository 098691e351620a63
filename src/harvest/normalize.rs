//! Raw item normalization and metric parsing/formatting.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::config::SourceConfig;
use crate::models::Item;
use crate::utils::{first_present, resolve_url, value_as_i64, value_as_string};

const ID_FIELDS: &[&str] = &["id", "itemId", "videoId", "aweme_id", "video_id"];
const URL_FIELDS: &[&str] = &["url", "shareUrl", "share_url", "href", "link"];
const COVER_FIELDS: &[&str] = &[
    "cover",
    "video.cover",
    "video.originCover",
    "video.dynamicCover",
    "thumbnail",
    "coverUrl",
];
const METRIC_FIELDS: &[&str] = &[
    "stats.playCount",
    "statistics.play_count",
    "statsV2.playCount",
    "playCount",
    "play_count",
    "views",
    "viewCount",
    "view_count",
];
const CREATE_TIME_FIELDS: &[&str] = &["createTime", "create_time", "createdAt"];

/// Timestamps above this are taken to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Number with optional fraction and K/M suffix, after separators are stripped.
static METRIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:\.(\d+))?([kKmM])?").expect("valid metric regex"));

/// Everything the normalizer needs besides the raw item itself.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub subject: &'a str,
    pub source: &'a SourceConfig,
}

/// Turn one raw item into a canonical [`Item`].
///
/// Returns `None` when no ID can be derived; such items are dropped.
pub fn normalize(raw: &Value, ctx: &ItemContext<'_>) -> Option<Item> {
    let raw_url = first_present(raw, URL_FIELDS).and_then(value_as_string);

    let id = first_present(raw, ID_FIELDS)
        .and_then(value_as_string)
        .or_else(|| raw_url.as_deref().and_then(id_from_url))?;

    let url = match raw_url {
        Some(url) => resolve_url(&ctx.source.base_url, &url),
        None => ctx.source.item_url(ctx.subject, &id),
    };

    let cover = first_present(raw, COVER_FIELDS)
        .and_then(value_as_string)
        .unwrap_or_default();

    let metric = first_present(raw, METRIC_FIELDS)
        .map(metric_from_value)
        .unwrap_or(0);

    let create_time = first_present(raw, CREATE_TIME_FIELDS)
        .and_then(value_as_i64)
        .map(|t| if t > MILLIS_THRESHOLD { t / 1000 } else { t })
        .unwrap_or(0);

    Some(
        Item::new(id, url, metric)
            .with_cover(cover)
            .with_create_time(create_time),
    )
}

fn metric_from_value(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f.floor() as u64))
            .unwrap_or(0),
        Value::String(s) => parse_metric(s),
        _ => 0,
    }
}

/// Trailing non-empty path segment of a URL, ignoring query and fragment.
fn id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|seg| !seg.is_empty())
        .filter(|seg| seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .map(str::to_string)
}

/// Parse a display metric such as `"12.3K"`, `"4.1M"` or `"1,234"`.
///
/// Thousands separators and whitespace are ignored, a trailing `K`/`M`
/// multiplies by 1,000 / 1,000,000, and the result is floored. Text
/// without digits parses as 0.
pub fn parse_metric(text: &str) -> u64 {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();

    let Some(caps) = METRIC_RE.captures(&cleaned) else {
        return 0;
    };

    let multiplier: u128 = match caps.get(3).map(|m| m.as_str()) {
        Some("k" | "K") => 1_000,
        Some("m" | "M") => 1_000_000,
        _ => 1,
    };

    let whole: u128 = caps[1].parse().unwrap_or(u128::MAX);
    // Digits past the multiplier's precision cannot change the floored value.
    let fraction = caps.get(2).map_or("", |m| m.as_str());
    let fraction = &fraction[..fraction.len().min(12)];
    let fraction_value: u128 = if fraction.is_empty() {
        0
    } else {
        let digits: u128 = fraction.parse().unwrap_or(0);
        digits * multiplier / 10u128.pow(fraction.len() as u32)
    };

    whole
        .saturating_mul(multiplier)
        .saturating_add(fraction_value)
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Render a metric for display: `987`, `12.3K`, `4.1M`.
///
/// One decimal, rounded half up. A thousands value that rounds to 1000.0K
/// is shown as `1.0M`.
pub fn format_metric(value: u64) -> String {
    let value = value as u128;
    if value >= 1_000_000 {
        let tenths = (value * 10 + 500_000) / 1_000_000;
        format!("{}.{}M", tenths / 10, tenths % 10)
    } else if value >= 1_000 {
        let tenths = (value * 10 + 500) / 1_000;
        if tenths >= 10_000 {
            return "1.0M".to_string();
        }
        format!("{}.{}K", tenths / 10, tenths % 10)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> SourceConfig {
        SourceConfig {
            base_url: "https://example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_metric_suffixes() {
        assert_eq!(parse_metric("12.3K"), 12_300);
        assert_eq!(parse_metric("4.1M"), 4_100_000);
        assert_eq!(parse_metric("1.2345k"), 1_234);
        assert_eq!(parse_metric("7m"), 7_000_000);
        assert_eq!(parse_metric("0.5K"), 500);
    }

    #[test]
    fn test_parse_metric_separators_and_noise() {
        assert_eq!(parse_metric("1,234"), 1_234);
        assert_eq!(parse_metric(" 12 345 "), 12_345);
        assert_eq!(parse_metric("987 views"), 987);
        assert_eq!(parse_metric("12.7"), 12);
        assert_eq!(parse_metric("views"), 0);
        assert_eq!(parse_metric(""), 0);
    }

    #[test]
    fn test_format_metric() {
        assert_eq!(format_metric(0), "0");
        assert_eq!(format_metric(999), "999");
        assert_eq!(format_metric(1_000), "1.0K");
        assert_eq!(format_metric(12_345), "12.3K");
        assert_eq!(format_metric(12_350), "12.4K");
        assert_eq!(format_metric(999_949), "999.9K");
        assert_eq!(format_metric(999_950), "1.0M");
        assert_eq!(format_metric(4_100_000), "4.1M");
        assert_eq!(format_metric(1_250_000), "1.3M");
    }

    #[test]
    fn test_display_values_survive_parse_format() {
        for display in ["12.3K", "4.1M", "1.0K", "999.9K", "123.4M", "42"] {
            assert_eq!(format_metric(parse_metric(display)), display);
        }
    }

    #[test]
    fn test_normalize_api_item() {
        let raw = json!({
            "id": "7301",
            "createTime": 1_700_000_000,
            "video": {"cover": "https://cdn.example.com/7301.jpg"},
            "stats": {"playCount": 15_000}
        });
        let ctx = ItemContext {
            subject: "alice",
            source: &source(),
        };
        let item = normalize(&raw, &ctx).unwrap();

        assert_eq!(item.id, "7301");
        assert_eq!(item.url, "https://example.com/@alice/video/7301");
        assert_eq!(item.cover, "https://cdn.example.com/7301.jpg");
        assert_eq!(item.metric, 15_000);
        assert_eq!(item.create_time, 1_700_000_000);
    }

    #[test]
    fn test_normalize_dom_item_derives_id_from_href() {
        let raw = json!({"href": "/@alice/video/222?lang=en", "views": "1.5M", "cover": null});
        let ctx = ItemContext {
            subject: "alice",
            source: &source(),
        };
        let item = normalize(&raw, &ctx).unwrap();

        assert_eq!(item.id, "222");
        assert_eq!(item.url, "https://example.com/@alice/video/222?lang=en");
        assert_eq!(item.metric, 1_500_000);
        assert_eq!(item.cover, "");
        assert_eq!(item.create_time, 0);
    }

    #[test]
    fn test_normalize_numeric_id_and_millis() {
        let raw = json!({"aweme_id": 99, "createTime": 1_700_000_000_123_i64, "playCount": "2,000"});
        let ctx = ItemContext {
            subject: "bob",
            source: &source(),
        };
        let item = normalize(&raw, &ctx).unwrap();
        assert_eq!(item.id, "99");
        assert_eq!(item.create_time, 1_700_000_000);
        assert_eq!(item.metric, 2_000);
    }

    #[test]
    fn test_normalize_without_id_is_dropped() {
        let ctx = ItemContext {
            subject: "bob",
            source: &source(),
        };
        assert!(normalize(&json!({"views": 10}), &ctx).is_none());
        assert!(normalize(&json!({"href": "https://example.com/"}), &ctx).is_none());
    }
}
