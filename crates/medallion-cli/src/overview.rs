//! Population and data quality overview.
//!
//! Every figure is computed against one pinned snapshot per table, so the
//! overview is consistent even while a refresh commits new versions. A
//! table that does not exist yet makes its figures unavailable instead of
//! failing the whole overview.

use serde::Serialize;

use medallion_catalog::aggregate::{AggregateFunc, AggregateSpec};
use medallion_catalog::reader::QueryResult;
use medallion_catalog::value::Value;
use medallion_catalog::{CatalogError, CatalogStore, SnapshotHandle, TableRef};

/// Raw people extract.
pub const PEOPLE: &str = "bronze.people";
/// Raw regions extract.
pub const REGIONS: &str = "bronze.regions";
/// Per-faction gold mart.
pub const FACTION_MART: &str = "gold.mart_faction_analytics";

/// A figure that may be unavailable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Reading<T> {
    /// The figure was computed.
    Available {
        /// The figure.
        value: T,
    },
    /// A source table or column is missing.
    Unavailable {
        /// What is missing.
        reason: String,
    },
}

impl<T> Reading<T> {
    /// The value, if available.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Available { value } => Some(value),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Age statistics over the people extract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeStats {
    /// Youngest recorded age.
    pub min: Option<f64>,
    /// Oldest recorded age.
    pub max: Option<f64>,
    /// Mean recorded age.
    pub mean: Option<f64>,
    /// People, including those without an age.
    pub records: usize,
}

/// How many regions have at least one resident.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    /// Distinct regions referenced by people.
    pub regions_with_people: usize,
    /// Distinct regions in the regions extract.
    pub total_regions: usize,
    /// `regions_with_people` as a percentage of `total_regions`.
    pub percent: Option<f64>,
}

/// Share of people with each optional field present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completeness {
    /// Percentage of people with an age.
    pub age_percent: Option<f64>,
    /// Percentage of people with a region.
    pub region_percent: Option<f64>,
}

/// The overview figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    /// People in the raw extract.
    pub total_population: Reading<usize>,
    /// Regions in the raw extract.
    pub regions: Reading<usize>,
    /// Distinct factions in the faction mart.
    pub factions: Reading<usize>,
    /// Mean of the per-faction average ages, to one decimal.
    pub average_age: Reading<Option<f64>>,
    /// Age range and mean over the raw extract.
    pub age: Reading<AgeStats>,
    /// Regional coverage.
    pub coverage: Reading<Coverage>,
    /// Data completeness.
    pub completeness: Reading<Completeness>,
}

/// Computes the overview from the current snapshots.
///
/// # Errors
///
/// Returns a catalog error only if storage fails; missing tables and
/// columns become unavailable readings.
pub async fn compute(store: &CatalogStore) -> medallion_catalog::Result<Overview> {
    let people = pin(store, PEOPLE).await?;
    let regions = pin(store, REGIONS).await?;
    let factions = pin(store, FACTION_MART).await?;

    let coverage = match (&people, &regions) {
        (Some(p), Some(r)) => attempt(|| {
            let regions_with_people = p.distinct_count("current_region_id")?;
            let total_regions = r.distinct_count("region_id")?;
            Ok(Coverage {
                regions_with_people,
                total_regions,
                percent: percent(regions_with_people, total_regions),
            })
        }),
        (None, _) => missing(PEOPLE),
        (_, None) => missing(REGIONS),
    };

    Ok(Overview {
        total_population: reading(people.as_ref(), PEOPLE, |h| Ok(h.row_count())),
        regions: reading(regions.as_ref(), REGIONS, |h| Ok(h.row_count())),
        factions: reading(factions.as_ref(), FACTION_MART, |h| {
            h.distinct_count("current_faction")
        }),
        average_age: reading(factions.as_ref(), FACTION_MART, |h| {
            let result = h.aggregate(
                None,
                &[],
                &[AggregateSpec::over("avg", AggregateFunc::Avg, "avg_age")],
            )?;
            Ok(scalar_f64(&result, "avg").map(round1))
        }),
        age: reading(people.as_ref(), PEOPLE, |h| {
            let result = h.aggregate(
                None,
                &[],
                &[
                    AggregateSpec::over("min", AggregateFunc::Min, "age"),
                    AggregateSpec::over("max", AggregateFunc::Max, "age"),
                    AggregateSpec::over("mean", AggregateFunc::Avg, "age"),
                ],
            )?;
            Ok(AgeStats {
                min: scalar_f64(&result, "min"),
                max: scalar_f64(&result, "max"),
                mean: scalar_f64(&result, "mean"),
                records: h.row_count(),
            })
        }),
        coverage,
        completeness: reading(people.as_ref(), PEOPLE, |h| {
            let result = h.aggregate(
                None,
                &[],
                &[
                    AggregateSpec::over("ages", AggregateFunc::Count, "age"),
                    AggregateSpec::over("regions", AggregateFunc::Count, "current_region_id"),
                ],
            )?;
            let total = h.row_count();
            Ok(Completeness {
                age_percent: percent(scalar_count(&result, "ages"), total),
                region_percent: percent(scalar_count(&result, "regions"), total),
            })
        }),
    })
}

async fn pin(store: &CatalogStore, table: &str) -> medallion_catalog::Result<Option<SnapshotHandle>> {
    let table: TableRef = table.parse()?;
    match store.read_snapshot(&table).await {
        Ok(handle) => Ok(Some(handle)),
        Err(CatalogError::TableNotFound { .. } | CatalogError::NamespaceNotFound { .. }) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn reading<T>(
    handle: Option<&SnapshotHandle>,
    table: &str,
    figure: impl FnOnce(&SnapshotHandle) -> medallion_catalog::Result<T>,
) -> Reading<T> {
    match handle {
        Some(handle) => attempt(|| figure(handle)),
        None => missing(table),
    }
}

fn attempt<T>(figure: impl FnOnce() -> medallion_catalog::Result<T>) -> Reading<T> {
    match figure() {
        Ok(value) => Reading::Available { value },
        Err(e) => Reading::Unavailable {
            reason: e.to_string(),
        },
    }
}

fn missing<T>(table: &str) -> Reading<T> {
    Reading::Unavailable {
        reason: format!("{table} has not been loaded"),
    }
}

fn scalar_f64(result: &QueryResult, column: &str) -> Option<f64> {
    result.scalar(column).and_then(Value::as_f64)
}

fn scalar_count(result: &QueryResult, column: &str) -> usize {
    match result.scalar(column) {
        Some(Value::Integer(n)) => usize::try_from(*n).unwrap_or(0),
        _ => 0,
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 * 100.0 / whole as f64)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
