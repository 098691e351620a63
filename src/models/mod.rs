//! Data models for viewharvest.

mod baseline;
mod item;

pub use baseline::{BaselineRecord, SubjectBaseline};
pub use item::{Item, ItemWithChange};
