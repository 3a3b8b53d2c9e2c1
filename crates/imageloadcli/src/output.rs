use anyhow::{Context, Result};
use imageloader_service::types::{CacheStats, LoadResult};
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Row, Table, cell, row};
use serde::Serialize;

use crate::settings::OutputFormat;

/// Outcome of the `preload` command.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PreloadSummary {
    pub requested: usize,
    pub loaded: usize,
    pub stats: CacheStats,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

pub fn print_results(results: &[LoadResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(results),
        OutputFormat::Table => {
            results_table(results).printstd();
            Ok(())
        }
    }
}

pub fn print_preload(summary: &PreloadSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_format(*FORMAT_CLEAN);
            table.set_titles(row![b => "Requested", "Loaded", "Failed", "Cached"]);
            let mut row = Row::empty();
            row.add_cell(cell!(r->summary.requested));
            row.add_cell(cell!(r->summary.loaded));
            row.add_cell(cell!(r->summary.requested - summary.loaded));
            row.add_cell(cell!(r->summary.stats.size));
            table.add_row(row);
            table.printstd();
            Ok(())
        }
    }
}

fn results_table(results: &[LoadResult]) -> Table {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "URL", "Status", "Image", "Bytes", "Time", "Error"]);

    for result in results {
        let status = if result.loaded { "loaded" } else { "failed" };
        let (image, bytes) = match &result.image {
            Some(image) => (
                format!("{} {}x{}", image.format, image.width, image.height),
                image.size_bytes.to_string(),
            ),
            None => (String::new(), String::new()),
        };
        let time = result
            .load_time
            .map(|time| humantime::format_duration(time).to_string())
            .unwrap_or_default();
        let error = result.error.as_deref().unwrap_or_default();

        let mut row = Row::empty();
        row.add_cell(cell!(result.url));
        row.add_cell(cell!(status));
        row.add_cell(cell!(image));
        row.add_cell(cell!(r->bytes));
        row.add_cell(cell!(r->time));
        row.add_cell(cell!(error));
        table.add_row(row);
    }

    table
}
