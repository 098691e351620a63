//! Remote source description: where pages come from and how they are shaped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// How page bodies are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// A JSON document with an item list and a cursor.
    #[default]
    Json,
    /// A rendered page; items are pulled out of the DOM with selectors.
    Html,
}

/// CSS selectors for DOM extraction when `format = "html"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlExtraction {
    /// Container that only exists on a real listing page.
    pub list_selector: String,
    /// One element per item, searched inside the container.
    pub item_selector: String,
    /// Element carrying the item link (`href`).
    pub link_selector: String,
    /// Element whose text is the display metric, e.g. `12.3K`.
    pub metric_selector: String,
    /// Image carrying the cover (`src`).
    pub cover_selector: String,
}

impl Default for HtmlExtraction {
    fn default() -> Self {
        Self {
            list_selector: "[data-e2e=\"user-post-item-list\"]".to_string(),
            item_selector: "[data-e2e=\"user-post-item\"]".to_string(),
            link_selector: "a".to_string(),
            metric_selector: "[data-e2e=\"video-views\"]".to_string(),
            cover_selector: "img".to_string(),
        }
    }
}

/// Source configuration.
///
/// Describes the paginated list endpoint and the shape of its responses.
/// Field paths use dot notation (see [`crate::utils::extract_path`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Origin of the remote source, e.g. `https://www.example.com`.
    pub base_url: String,
    /// Path of the list endpoint. `{subject}` is substituted.
    pub endpoint: String,
    /// Query parameter carrying the subject handle. Empty to skip.
    pub subject_param: String,
    /// Query parameter carrying the cursor.
    pub cursor_param: String,
    /// Query parameter carrying the page size. Empty to skip.
    pub count_param: String,
    pub page_size: u32,
    /// Cursor sent with the first request.
    pub start_cursor: String,
    /// Fixed extra query parameters.
    pub extra_params: BTreeMap<String, String>,

    pub format: PayloadFormat,
    pub items_path: String,
    pub cursor_path: String,
    pub has_more_path: String,
    /// Field holding an application-level status code, if the source has one.
    pub status_code_path: Option<String>,
    /// Status codes meaning "subject does not exist".
    pub not_found_codes: Vec<i64>,
    /// Body markers meaning "subject does not exist" (case-insensitive).
    pub not_found_markers: Vec<String>,
    /// Extra challenge markers on top of the built-in list.
    pub challenge_markers: Vec<String>,
    /// Extra rate-limit markers on top of the built-in list.
    pub rate_limit_markers: Vec<String>,
    /// Body markers meaning the session identity was invalidated.
    pub expired_markers: Vec<String>,

    /// Template for item URLs when the payload carries none.
    /// Supports `{base_url}`, `{subject}` and `{id}`.
    pub item_url_template: String,
    pub html: HtmlExtraction,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoint: "/api/post/item_list/".to_string(),
            subject_param: "uniqueId".to_string(),
            cursor_param: "cursor".to_string(),
            count_param: "count".to_string(),
            page_size: 30,
            start_cursor: "0".to_string(),
            extra_params: BTreeMap::new(),
            format: PayloadFormat::Json,
            items_path: "itemList".to_string(),
            cursor_path: "cursor".to_string(),
            has_more_path: "hasMore".to_string(),
            status_code_path: Some("statusCode".to_string()),
            not_found_codes: vec![10202, 10221],
            not_found_markers: vec![
                "user not found".to_string(),
                "couldn't find this account".to_string(),
            ],
            challenge_markers: Vec::new(),
            rate_limit_markers: Vec::new(),
            expired_markers: vec!["session expired".to_string(), "login required".to_string()],
            item_url_template: "{base_url}/@{subject}/video/{id}".to_string(),
            html: HtmlExtraction::default(),
        }
    }
}

impl SourceConfig {
    /// Build the URL for one page of a subject's list.
    pub fn page_url(&self, subject: &str, cursor: &str) -> Result<String, url::ParseError> {
        let path = self.endpoint.replace("{subject}", subject);
        let mut url = Url::parse(&self.base_url)?.join(&path)?;

        let page_size = self.page_size.to_string();
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if !self.subject_param.is_empty() {
            pairs.push((self.subject_param.as_str(), subject));
        }
        if !self.cursor_param.is_empty() {
            pairs.push((self.cursor_param.as_str(), cursor));
        }
        if !self.count_param.is_empty() {
            pairs.push((self.count_param.as_str(), page_size.as_str()));
        }
        pairs.extend(
            self.extra_params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        // An empty query_pairs_mut() would still leave a trailing '?'.
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        Ok(url.into())
    }

    /// Canonical URL for an item that came without one.
    pub fn item_url(&self, subject: &str, id: &str) -> String {
        self.item_url_template
            .replace("{base_url}", self.base_url.trim_end_matches('/'))
            .replace("{subject}", subject)
            .replace("{id}", id)
    }
}
