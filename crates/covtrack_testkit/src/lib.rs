//! # covtrack testkit
//!
//! Test utilities for covtrack.
//!
//! This crate provides:
//! - Daily report fixtures with deterministic, growing counters
//! - A temporary data directory with a report mirror
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use covtrack_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn reconciles_a_week() {
//!     let remote = MockRemote::new();
//!     for day in date_range("2020-04-20", 7) {
//!         remote.set_records(day, sample_report(day));
//!     }
//!     // ... run the reconciler
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
