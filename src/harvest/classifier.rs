//! Response classification.
//!
//! Pure function of the response and the source's payload shape: the same
//! input always gets the same verdict, so every branch of the escalation
//! controller can be driven from canned responses.

use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};

use super::session::RawResponse;
use crate::config::{PayloadFormat, SourceConfig};
use crate::utils::{extract_path, value_as_i64, value_as_string};

/// Interstitial markers seen on challenge pages (lowercase).
const CHALLENGE_MARKERS: &[&str] = &[
    "verify you are a human",
    "verify you are human",
    "please complete the captcha",
    "solve this captcha",
    "captcha challenge",
    "cf-browser-verification",
    "px-captcha",
    "blocked by cloudflare",
    "please enable javascript and cookies",
    "suspicious activity",
    "unusual traffic",
    "are you a robot",
    "access denied",
    "security check",
    "<title>just a moment",
];

const RATE_LIMIT_MARKERS: &[&str] = &[
    "too many requests",
    "rate limit exceeded",
    "you are being rate limited",
    "slow down",
];

/// Verdict on one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Ok(PagePayload),
    Challenge,
    RateLimited,
    NotFound,
    Malformed(String),
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Ok(_) => "ok",
            Classification::Challenge => "challenge",
            Classification::RateLimited => "rate_limited",
            Classification::NotFound => "not_found",
            Classification::Malformed(_) => "malformed",
        }
    }
}

/// Items and continuation extracted from a successful page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePayload {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl PagePayload {
    /// A page that ends the listing.
    pub fn terminal(items: Vec<Value>) -> Self {
        Self {
            items,
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Classify a response against the source's payload shape.
pub fn classify(response: &RawResponse, source: &SourceConfig) -> Classification {
    if matches!(response.status, 429 | 503) {
        return Classification::RateLimited;
    }
    if response.status == 404 {
        return Classification::NotFound;
    }

    let lower = response.body.to_lowercase();
    match source.format {
        PayloadFormat::Json => classify_json(response, &lower, source),
        PayloadFormat::Html => classify_html(response, &lower, source),
    }
}

/// Whether the remote side invalidated the session's identity.
///
/// HTTP 401, or an expiry marker on a response that carries no item list.
pub fn identity_invalidated(response: &RawResponse, source: &SourceConfig) -> bool {
    if response.status == 401 {
        return true;
    }
    let lower = response.body.to_lowercase();
    if !contains_any(&lower, source.expired_markers.iter().map(String::as_str)) {
        return false;
    }
    match source.format {
        PayloadFormat::Json => parse_object(&response.body)
            .map_or(true, |doc| lookup(&doc, &source.items_path).is_none()),
        PayloadFormat::Html => !matches!(
            extract_html(&response.body, source),
            Ok(Some(_))
        ),
    }
}

fn classify_json(response: &RawResponse, lower: &str, source: &SourceConfig) -> Classification {
    let Some(doc) = parse_object(&response.body) else {
        return classify_unstructured(response, lower, source);
    };

    if has_not_found_code(&doc, source) {
        return Classification::NotFound;
    }

    match lookup(&doc, &source.items_path) {
        Some(Value::Array(items)) => return Classification::Ok(page_from(&doc, items.clone(), source)),
        Some(Value::Null) => return Classification::Ok(page_from(&doc, Vec::new(), source)),
        Some(_) => {
            return Classification::Malformed(format!("'{}' is not a list", source.items_path))
        }
        None => {}
    }

    // No list: the document is an error envelope or an interstitial.
    if contains_any(lower, source.not_found_markers.iter().map(String::as_str)) {
        return Classification::NotFound;
    }
    if is_rate_limit_text(lower, source) {
        return Classification::RateLimited;
    }
    if is_challenge_text(lower, source) {
        return Classification::Challenge;
    }
    if lookup(&doc, &source.has_more_path).and_then(as_flag) == Some(false) {
        return Classification::Ok(PagePayload::terminal(Vec::new()));
    }
    Classification::Malformed(format!("response has no '{}' list", source.items_path))
}

fn classify_html(response: &RawResponse, lower: &str, source: &SourceConfig) -> Classification {
    match extract_html(&response.body, source) {
        Ok(Some(items)) => return Classification::Ok(PagePayload::terminal(items)),
        Ok(None) => {}
        Err(reason) => return Classification::Malformed(reason),
    }

    if is_rate_limit_text(lower, source) {
        return Classification::RateLimited;
    }
    if contains_any(lower, source.not_found_markers.iter().map(String::as_str)) {
        return Classification::NotFound;
    }
    if response.status >= 500 && !is_challenge_text(lower, source) {
        return Classification::Malformed(format!("upstream status {}", response.status));
    }
    // The listing container is missing: whatever this page is, it is not ours.
    Classification::Challenge
}

/// A JSON source answered with something that is not a JSON object.
fn classify_unstructured(response: &RawResponse, lower: &str, source: &SourceConfig) -> Classification {
    if is_rate_limit_text(lower, source) {
        return Classification::RateLimited;
    }
    if is_challenge_text(lower, source) || response.status == 403 {
        return Classification::Challenge;
    }
    if response.status >= 500 {
        return Classification::Malformed(format!("upstream status {}", response.status));
    }
    let trimmed = response.body.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('<') {
        // Empty bodies and markup where JSON was expected are soft blocks.
        return Classification::Challenge;
    }
    Classification::Malformed("response is not a JSON object".to_string())
}

fn page_from(doc: &Value, items: Vec<Value>, source: &SourceConfig) -> PagePayload {
    let next_cursor = value_as_string(extract_path(doc, &source.cursor_path));
    let has_more = lookup(doc, &source.has_more_path)
        .and_then(as_flag)
        .unwrap_or(next_cursor.is_some() && !items.is_empty());
    PagePayload {
        items,
        next_cursor,
        has_more,
    }
}

fn has_not_found_code(doc: &Value, source: &SourceConfig) -> bool {
    source
        .status_code_path
        .as_deref()
        .and_then(|path| value_as_i64(extract_path(doc, path)))
        .is_some_and(|code| source.not_found_codes.contains(&code))
}

fn parse_object(body: &str) -> Option<Value> {
    serde_json::from_str::<Value>(body)
        .ok()
        .filter(Value::is_object)
}

/// Like `extract_path`, but distinguishes a missing key from an explicit null.
fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for key in path.split('.').filter(|k| !k.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(arr) => arr.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn contains_any<'a>(haystack: &str, markers: impl IntoIterator<Item = &'a str>) -> bool {
    markers
        .into_iter()
        .any(|m| !m.is_empty() && haystack.contains(&m.to_lowercase()))
}

fn is_challenge_text(lower: &str, source: &SourceConfig) -> bool {
    contains_any(lower, CHALLENGE_MARKERS.iter().copied())
        || contains_any(lower, source.challenge_markers.iter().map(String::as_str))
}

fn is_rate_limit_text(lower: &str, source: &SourceConfig) -> bool {
    contains_any(lower, RATE_LIMIT_MARKERS.iter().copied())
        || contains_any(lower, source.rate_limit_markers.iter().map(String::as_str))
}

fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|_| format!("invalid selector: {}", css))
}

/// Pull raw items out of a listing page. `Ok(None)` when the listing
/// container is absent.
fn extract_html(body: &str, source: &SourceConfig) -> Result<Option<Vec<Value>>, String> {
    let html = &source.html;
    let list = selector(&html.list_selector)?;
    let item = selector(&html.item_selector)?;
    let link = selector(&html.link_selector)?;
    let metric = selector(&html.metric_selector)?;
    let cover = selector(&html.cover_selector)?;

    let document = Html::parse_document(body);
    let Some(container) = document.select(&list).next() else {
        return Ok(None);
    };

    let items = container
        .select(&item)
        .map(|el| {
            let href = first_attr(el, &link, "href");
            let views = el
                .select(&metric)
                .next()
                .map(|m| m.text().collect::<String>().trim().to_string());
            let cover = first_attr(el, &cover, "src");
            json!({ "href": href, "views": views, "cover": cover })
        })
        .collect();

    Ok(Some(items))
}

fn first_attr(el: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    el.value()
        .attr(attr)
        .or_else(|| el.select(sel).find_map(|child| child.value().attr(attr)))
        .map(str::to_string)
}
