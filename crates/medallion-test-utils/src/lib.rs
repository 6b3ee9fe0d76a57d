//! Shared test utilities for medallion integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: in-memory storage with operation recording
//!   and fault injection
//! - [`TestCatalog`]: a store with the medallion namespaces created
//! - [`ExtractDir`] and generators for raw extract files
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use medallion_test_utils::{TestCatalog, ExtractDir};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestCatalog::new().await;
//!     let extracts = ExtractDir::new();
//!     extracts.write_ondoriya(50, 200);
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("medallion=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
