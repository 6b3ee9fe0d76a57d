//! Overview command - population and data quality figures.

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::output::{print_json, render_table};
use crate::overview::{self, Overview, Reading};
use crate::{Config, OutputFormat};

/// Execute the overview command.
///
/// # Errors
///
/// Returns an error if the catalog cannot be opened or read.
pub async fn execute(config: &Config) -> Result<()> {
    let store = config.open_store().await?;
    let overview = overview::compute(&store).await?;

    match config.format {
        OutputFormat::Json => print_json(&overview)?,
        OutputFormat::Text => {
            for (label, value) in lines(&overview) {
                println!("{label:<20} {value}");
            }
        }
        OutputFormat::Table => {
            let rows = lines(&overview)
                .into_iter()
                .map(|(label, value)| vec![label.to_string(), value]);
            println!(
                "{}",
                render_table(["Metric".to_string(), "Value".to_string()], rows)
            );
        }
    }
    Ok(())
}

fn lines(overview: &Overview) -> Vec<(&'static str, String)> {
    vec![
        (
            "Total population",
            show(&overview.total_population, ToString::to_string),
        ),
        ("Regions", show(&overview.regions, ToString::to_string)),
        ("Factions", show(&overview.factions, ToString::to_string)),
        ("Average age", show(&overview.average_age, |v| number(*v))),
        (
            "Age range",
            show(&overview.age, |a| {
                format!("{} - {}", number(a.min), number(a.max))
            }),
        ),
        ("Mean age", show(&overview.age, |a| number(a.mean))),
        (
            "Regional coverage",
            show(&overview.coverage, |c| {
                format!(
                    "{} of {} ({})",
                    c.regions_with_people,
                    c.total_regions,
                    percent(c.percent)
                )
            }),
        ),
        (
            "Age completeness",
            show(&overview.completeness, |c| percent(c.age_percent)),
        ),
        (
            "Region completeness",
            show(&overview.completeness, |c| percent(c.region_percent)),
        ),
    ]
}

fn show<T>(reading: &Reading<T>, format: impl FnOnce(&T) -> String) -> String {
    match reading {
        Reading::Available { value } => format(value),
        Reading::Unavailable { reason } => {
            format!("unavailable: {reason}").dimmed().to_string()
        }
    }
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}%"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_figures_are_labelled() {
        let reading: Reading<usize> = Reading::Unavailable {
            reason: "bronze.people has not been loaded".to_string(),
        };
        assert!(show(&reading, ToString::to_string).contains("unavailable: bronze.people"));
        assert_eq!(show(&Reading::Available { value: 3_usize }, ToString::to_string), "3");
    }

    #[test]
    fn numbers_render_to_one_decimal() {
        assert_eq!(number(Some(41.25)), "41.2");
        assert_eq!(number(None), "-");
        assert_eq!(percent(Some(91.0)), "91.0%");
    }
}
