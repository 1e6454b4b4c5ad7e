//! # Pushnote Testkit
//!
//! Test utilities for the Pushnote sync engine.
//!
//! This crate provides:
//! - Fixtures for services, catalogs and push frames
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pushnote_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_catalog() {
//!     let remote = catalog(30);
//!     assert_eq!(remote.len(), 30);
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
