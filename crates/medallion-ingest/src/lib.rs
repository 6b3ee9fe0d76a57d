//! # medallion-ingest
//!
//! Raw extract reading and bronze loading for the medallion lakehouse.
//!
//! - [`open_extract`](extract::open_extract) turns a delimited text file into
//!   a lazy, typed rows provider
//! - [`BronzeLoader`](loader::BronzeLoader) loads extract mappings into
//!   bronze tables with create-if-absent semantics and a per-mapping report
//! - [`preflight`](loader::preflight) checks every source before a load
//!
//! ## Example
//!
//! ```rust,ignore
//! use medallion_ingest::prelude::*;
//!
//! let loader = BronzeLoader::new(store.clone(), ExtractOptions::default());
//! let report = loader
//!     .load(&[ExtractMapping::new("bronze.regions".parse()?, "data/regions.csv")])
//!     .await;
//! assert!(report.is_success());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod extract;
pub mod loader;
pub mod metrics;

pub use extract::{CsvExtract, ExtractError, ExtractOptions, open_extract};
pub use loader::{BronzeLoader, ExtractMapping, LoadReport, LoadStatus};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::extract::{CsvExtract, ExtractError, ExtractOptions, open_extract};
    pub use crate::loader::{
        BronzeLoader, ExtractMapping, LoadReport, LoadStatus, MappingReport, PreflightReport,
        SourceStatus, preflight,
    };
}
