//! Pipeline definitions and end-to-end runs.
//!
//! A pipeline definition is a JSON document naming the namespaces to
//! create, the extract to bronze mappings, and the transformation rules:
//!
//! ```json
//! {
//!   "namespaces": ["bronze", "silver", "gold"],
//!   "extracts": [
//!     {"table": "bronze.regions", "source": "political_geography/regions.csv"}
//!   ],
//!   "rules": []
//! }
//! ```
//!
//! Relative extract paths resolve against the definition file's directory.
//! Pipelines writing sibling namespaces are independent: each owns its
//! targets and reads the others only through committed snapshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use medallion_catalog::CatalogStore;
use medallion_core::settings::Settings;
use medallion_ingest::extract::ExtractOptions;
use medallion_ingest::loader::{
    BronzeLoader, ExtractMapping, LoadReport, PreflightReport, preflight,
};

use crate::cancel::CancellationToken;
use crate::engine::{RefreshEngine, RefreshOptions, RuleSet};
use crate::error::{FlowError, Result};
use crate::evaluator::RuleEvaluator;
use crate::report::RefreshReport;
use crate::rule::TransformationRule;

/// Namespaces created when a definition lists none.
pub const DEFAULT_NAMESPACES: [&str; 3] = ["bronze", "silver", "gold"];

fn default_namespaces() -> Vec<String> {
    DEFAULT_NAMESPACES.iter().map(ToString::to_string).collect()
}

/// Declarative description of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    /// Namespaces created by `init`.
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,
    /// Extract to bronze mappings, loaded in order.
    #[serde(default)]
    pub extracts: Vec<ExtractMapping>,
    /// Transformation rules.
    #[serde(default)]
    pub rules: Vec<TransformationRule>,
}

impl PipelineDefinition {
    /// Parses a definition; `path` is where it was read from.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Definition`] if the JSON is malformed.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let definition: Self =
            serde_json::from_str(text).map_err(|e| FlowError::Definition {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(definition.resolved_against(base))
    }

    /// Reads and parses a definition file.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Definition`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FlowError::Definition {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text, path)
    }

    /// Resolves relative extract paths against `base`.
    #[must_use]
    pub fn resolved_against(mut self, base: &Path) -> Self {
        self.extracts = self
            .extracts
            .into_iter()
            .map(|m| m.resolved_against(base))
            .collect();
        self
    }

    /// Extract files the pipeline reads.
    #[must_use]
    pub fn sources(&self) -> Vec<PathBuf> {
        self.extracts.iter().map(|m| m.source.clone()).collect()
    }
}

/// Results of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    /// Namespaces that did not exist before the run.
    pub namespaces_created: Vec<String>,
    /// Bronze load results.
    pub load: LoadReport,
    /// Refresh cycle results.
    pub refresh: RefreshReport,
}

impl PipelineReport {
    /// Whether every mapping loaded and every table ended fresh.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.load.is_success() && self.refresh.is_success()
    }
}

/// A pipeline definition bound to a catalog store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<CatalogStore>,
    definition: PipelineDefinition,
    rules: RuleSet,
    extract_options: ExtractOptions,
    loader: BronzeLoader,
    engine: RefreshEngine,
}

impl Pipeline {
    /// Binds `definition` to `store`, validating its rules.
    ///
    /// # Errors
    ///
    /// Returns any rule set error: duplicates, undeclared inputs, cycles.
    pub fn new(store: Arc<CatalogStore>, definition: PipelineDefinition) -> Result<Self> {
        let rules = RuleSet::new(definition.rules.clone())?;
        Ok(Self {
            loader: BronzeLoader::new(Arc::clone(&store), ExtractOptions::default()),
            engine: RefreshEngine::new(Arc::clone(&store)),
            store,
            definition,
            rules,
            extract_options: ExtractOptions::default(),
        })
    }

    /// Like [`new`](Self::new), taking sample size and parallelism from settings.
    ///
    /// # Errors
    ///
    /// Returns any rule set error.
    pub fn with_settings(
        store: Arc<CatalogStore>,
        definition: PipelineDefinition,
        settings: &Settings,
    ) -> Result<Self> {
        let mut pipeline = Self::new(store, definition)?;
        pipeline.extract_options.sample_rows = settings.sample_rows;
        pipeline.loader = BronzeLoader::from_settings(Arc::clone(&pipeline.store), settings);
        pipeline.engine = pipeline.engine.with_options(RefreshOptions::from(settings));
        Ok(pipeline)
    }

    /// Replaces the refresh options.
    #[must_use]
    pub fn with_refresh_options(mut self, options: RefreshOptions) -> Self {
        self.engine = self.engine.with_options(options);
        self
    }

    /// Replaces the rule evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.engine = self.engine.with_evaluator(evaluator);
        self
    }

    /// The definition.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// The planned rule set.
    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    /// Creates the declared namespaces. Returns those that were new.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for a malformed name or storage failure.
    pub async fn init(&self) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for namespace in &self.definition.namespaces {
            if self.store.create_namespace(namespace).await? {
                tracing::info!(namespace = %namespace, "namespace created");
                created.push(namespace.clone());
            }
        }
        Ok(created)
    }

    /// Checks every extract source without loading anything.
    #[must_use]
    pub fn preflight(&self) -> PreflightReport {
        preflight(&self.definition.extracts, self.extract_options)
    }

    /// Loads every extract into bronze.
    pub async fn load(&self) -> LoadReport {
        self.loader.load(&self.definition.extracts).await
    }

    /// Runs one refresh cycle over the pipeline's rules.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::NamespaceNotFound`] if a target namespace is
    /// missing; nothing is written in that case.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshReport> {
        self.engine.refresh(&self.rules, cancel).await
    }

    /// Creates namespaces, loads bronze and refreshes derived tables.
    ///
    /// # Errors
    ///
    /// Returns an error only if namespaces cannot be created or a target
    /// namespace is missing; per-table problems land in the report.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineReport> {
        let namespaces_created = self.init().await?;
        let load = self.load().await;
        let refresh = self.refresh(cancel).await?;
        Ok(PipelineReport {
            namespaces_created,
            load,
            refresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_defaults_and_resolves_paths() {
        let definition = PipelineDefinition::parse(
            r#"{"extracts": [
                {"table": "bronze.regions", "source": "geo/regions.csv"},
                {"table": "bronze.people", "source": "/abs/people.csv"}
            ]}"#,
            Path::new("/data/pipeline.json"),
        )
        .unwrap();
        assert_eq!(definition.namespaces, vec!["bronze", "silver", "gold"]);
        assert_eq!(
            definition.sources(),
            vec![
                PathBuf::from("/data/geo/regions.csv"),
                PathBuf::from("/abs/people.csv")
            ]
        );
        assert!(definition.rules.is_empty());
    }

    #[test]
    fn malformed_definition_names_the_file() {
        let err = PipelineDefinition::parse("{", Path::new("/data/pipeline.json")).unwrap_err();
        assert!(matches!(err, FlowError::Definition { .. }));
        assert!(err.to_string().contains("/data/pipeline.json"));
    }

    #[test]
    fn missing_file_is_a_definition_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineDefinition::load(dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.kind(), "definition");
    }
}
