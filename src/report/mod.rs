//! Build reporting
//!
//! Consumes the engine's [`BuildSummary`] after a completed build and
//! produces the operator-facing diagnostics: the asset size table, the
//! optional dependency-cycle warning, and the optional kiln-report.json
//! artifact written next to the build output.

pub mod cycles;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::warn;

use crate::bundler::BuildSummary;
use crate::config::BuildConfig;
use crate::utils::format_size;

pub use cycles::{cycle_signature, detect_cycles, DependencyGraph};

/// How many cycles the terminal warning previews
const CYCLE_PREVIEW: usize = 5;

/// Asset-table truncation: tables longer than this show only the first and
/// last few rows
const TABLE_LIMIT: usize = 20;
const TABLE_HEAD: usize = 4;
const TABLE_TAIL: usize = 5;

/// One line of the emitted report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportItem {
    pub file_name: String,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gzip_bytes: Option<u64>,
}

/// Size totals across all emitted assets
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gzip_bytes: Option<u64>,
}

/// The structured build report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub created_at: String,
    pub items: Vec<ReportItem>,
    pub totals: ReportTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles: Option<Vec<Vec<String>>>,
}

/// Whether an asset is worth gzip measurement
fn should_gzip(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    [".js", ".mjs", ".css", ".html", ".json", ".svg", ".txt", ".wasm"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Gzip-compressed size of an emitted file, if it can be read
fn gzip_size(path: &Path) -> Option<u64> {
    let content = std::fs::read(path).ok()?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&content).ok()?;
    let compressed = encoder.finish().ok()?;
    Some(compressed.len() as u64)
}

/// Build the structured report from a completed summary
pub fn build_report(config: &BuildConfig, summary: &BuildSummary, out_dir: &Path) -> BuildReport {
    let mut items: Vec<ReportItem> = summary
        .assets
        .iter()
        .map(|asset| {
            let gzip_bytes = if config.gzip && should_gzip(&asset.name) {
                gzip_size(&out_dir.join(&asset.name))
            } else {
                None
            };

            ReportItem {
                file_name: asset.name.clone(),
                bytes: asset.bytes,
                gzip_bytes,
            }
        })
        .collect();

    items.sort_by(|a, b| b.bytes.cmp(&a.bytes));

    let totals = ReportTotals {
        bytes: items.iter().map(|item| item.bytes).sum(),
        gzip_bytes: if config.gzip {
            Some(items.iter().filter_map(|item| item.gzip_bytes).sum())
        } else {
            None
        },
    };

    let graph = DependencyGraph::from_modules(&summary.modules);
    let cycles = if config.dependency_cycle_check {
        let found = detect_cycles(&graph);
        if found.is_empty() {
            None
        } else {
            Some(found)
        }
    } else {
        None
    };

    BuildReport {
        created_at: chrono::Utc::now().to_rfc3339(),
        items,
        totals,
        cycles,
    }
}

/// Rows of the printed asset table, truncated like the report output:
/// long tables keep the head and tail with a `....` separator row
fn table_rows(report: &BuildReport) -> Vec<(String, String, Option<String>)> {
    let gzip = report.totals.gzip_bytes.is_some();
    let mut rows = Vec::new();
    let count = report.items.len();

    for (index, item) in report.items.iter().enumerate() {
        if count > TABLE_LIMIT && index >= TABLE_HEAD && index < count - TABLE_TAIL {
            if index == TABLE_HEAD {
                rows.push((
                    "....".to_string(),
                    "....".to_string(),
                    gzip.then(|| "....".to_string()),
                ));
            }
            continue;
        }

        rows.push((
            item.file_name.clone(),
            format_size(item.bytes),
            item.gzip_bytes.map(format_size),
        ));
    }

    rows.push((
        format!("There are {} files", count),
        format_size(report.totals.bytes),
        report.totals.gzip_bytes.map(format_size),
    ));

    rows
}

/// Print the asset table to the operator's terminal
fn print_asset_table(report: &BuildReport) {
    if report.items.is_empty() {
        return;
    }

    let rows = table_rows(report);
    let name_width = rows.iter().map(|(name, _, _)| name.len()).max().unwrap_or(0);
    let size_width = rows.iter().map(|(_, size, _)| size.len()).max().unwrap_or(0);

    for (index, (name, size, gzip)) in rows.iter().enumerate() {
        // Delimit the totals row
        if index == rows.len() - 1 {
            eprintln!("  {}", "-".repeat(name_width + size_width + 12).dimmed());
        }

        let mut line = format!("  {:<name_width$}  {:>size_width$}", name, size);
        if let Some(gzip) = gzip {
            line.push_str(&format!("  {:>10}", gzip));
        }
        eprintln!("{}", line.cyan().dimmed());
    }
}

/// Print the dependency-cycle warning preview
fn print_cycle_warning(cycles: &[Vec<String>]) {
    let preview: Vec<&Vec<String>> = cycles.iter().take(CYCLE_PREVIEW).collect();

    warn!(
        "Detected circular dependencies (showing {}/{}):",
        preview.len(),
        cycles.len()
    );
    for cycle in preview {
        eprintln!("  {} {}", "-".yellow(), cycle_signature(cycle).yellow());
    }
}

/// Closing line for a completed build
fn end_tips(summary: &BuildSummary) -> String {
    let seconds = summary.duration_ms as f64 / 1000.0;

    if summary.errors > 0 {
        format!(
            "compiled with {}",
            format!("{} error", summary.errors).red()
        )
    } else if summary.warnings > 0 {
        format!(
            "compile {} and with {}, time: {:.2}s",
            "success".green(),
            format!("{} warning", summary.warnings).yellow(),
            seconds
        )
    } else {
        format!("compile {}, time: {:.2}s.", "success".green(), seconds)
    }
}

/// Produce all post-build diagnostics for one completed build
pub fn emit_report(config: &BuildConfig, summary: &BuildSummary, out_dir: &Path) -> Result<()> {
    let report = build_report(config, summary, out_dir);

    eprintln!();
    print_asset_table(&report);

    if let Some(cycles) = &report.cycles {
        eprintln!();
        print_cycle_warning(cycles);
    }

    if config.out_report {
        let path = out_dir.join("kiln-report.json");
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize build report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }

    eprintln!();
    eprintln!("{}", end_tips(summary).dimmed());

    Ok(())
}
