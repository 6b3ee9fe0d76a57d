//! CLI command implementations.

pub mod overview;
pub mod pipeline;
pub mod show;
pub mod stats;
pub mod tables;
