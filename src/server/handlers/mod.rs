//! HTTP request handlers for the web server.

mod api;
mod types;
mod views;
mod watched;

// Re-export handlers for use by the router
pub use api::{health, refresh, resolve_challenge};
pub use views::views;
pub use watched::{add_watched, list_watched, remove_watched};
