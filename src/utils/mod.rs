//! Shared utility functions.
//!
//! - `json`: dot-path lookups into loosely shaped JSON payloads

mod json;

pub use json::{extract_path, first_present, resolve_url, value_as_i64, value_as_string};
