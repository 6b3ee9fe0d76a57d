//! # medallion-flow
//!
//! Transformation rules and the refresh engine of the medallion lakehouse.
//!
//! - **Rules**: declarative queries, each producing one table from declared
//!   inputs ([`TransformationRule`](rule::TransformationRule))
//! - **Planning**: a dependency graph over tables, validated and staged
//!   before anything is written ([`RuleSet`](engine::RuleSet))
//! - **Refresh**: fingerprint-skipping, failure-contained rebuilds in
//!   dependency order ([`RefreshEngine`](engine::RefreshEngine))
//! - **Pipelines**: namespace creation, bronze load and refresh from one
//!   JSON definition ([`Pipeline`](pipeline::Pipeline))
//!
//! ## Example
//!
//! ```rust,ignore
//! use medallion_flow::prelude::*;
//!
//! let definition = PipelineDefinition::load("demos/ondoriya/pipeline.json")?;
//! let pipeline = Pipeline::new(store.clone(), definition)?;
//! let report = pipeline.run(&CancellationToken::new()).await?;
//! for table in &report.refresh.tables {
//!     println!("{} {}", table.table, table.status);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod dag;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fingerprint;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod rule;

pub use error::{FlowError, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::engine::{RefreshEngine, RefreshOptions, RuleSet};
    pub use crate::error::{FlowError, Result};
    pub use crate::evaluator::{PlanEvaluator, RuleEvaluator, RuleInputs, RuleOutput};
    pub use crate::pipeline::{Pipeline, PipelineDefinition, PipelineReport};
    pub use crate::report::{RefreshReport, RefreshSummary, TableReport, TableStatus};
    pub use crate::rule::{
        Derived, Join, JoinKind, QuerySpec, SelectItem, Source, TransformationRule,
    };
}
