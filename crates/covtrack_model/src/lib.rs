//! # covtrack model
//!
//! Value types shared by the covtrack sync engine and its collaborators.
//!
//! This crate provides:
//! - `DateKey`, the `YYYY-MM-DD` primary temporal key
//! - `Place`, the world ⊃ country ⊃ region ⊃ sub-region hierarchy
//! - `Stats` and `StatRecord`, immutable per-day, per-place snapshots
//! - `Metric` for rankings
//! - `Query`, the request shapes understood by the repository
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod date;
mod error;
mod place;
mod query;
mod record;

pub use date::DateKey;
pub use error::{ModelError, ModelResult};
pub use place::{Place, PlaceLevel};
pub use query::Query;
pub use record::{Metric, StatRecord, Stats};
