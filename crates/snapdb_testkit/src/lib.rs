//! # SnapDB Testkit
//!
//! Test utilities for SnapDB.
//!
//! This crate provides:
//! - Record types and test databases with automatic cleanup
//! - Property-based test generators using proptest
//! - A model-checking harness that mirrors committed state
//! - Concurrent stress drivers
//! - One-time tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use snapdb_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     increment(db, "hits").unwrap();
//!     assert_eq!(counter_value(db, "hits").unwrap(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use logging::*;
pub use stress::*;
