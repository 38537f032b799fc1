//! Run artifacts: markdown brief, JSON delta, parquet snapshot + manifest.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use arrow_array::{BooleanArray, Float64Array, Int32Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use bidcast_core::DatedBid;
use bidcast_storage::{sha256_hex, write_atomic};
use serde::Serialize;
use uuid::Uuid;

use crate::collect::CollectSummary;
use crate::forecast::ForecastSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

pub fn run_dir(reports_root: &Path, run_id: Uuid) -> PathBuf {
    reports_root.join(run_id.to_string())
}

pub fn collect_brief(summary: &CollectSummary) -> String {
    let mut lines = vec![
        "# Bid Collection Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Output: `{}`", summary.output.display()),
        format!("- Collected rows: {}", summary.collected),
        format!("- Malformed rows: {}", summary.malformed_rows),
        format!("- Awards applied: {}", summary.awards_applied),
        String::new(),
        "## Endpoints".to_string(),
    ];
    for e in &summary.endpoints {
        lines.push(format!(
            "- {} ({}): total {}, pages {}, failed {}, collected {}{}",
            e.category,
            e.endpoint,
            e.total_count,
            e.pages_requested,
            e.pages_failed,
            e.collected,
            if e.capped { " (capped)" } else { "" }
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

pub fn forecast_brief(summary: &ForecastSummary) -> String {
    let mut per_year: BTreeMap<i32, (usize, usize)> = BTreeMap::new();
    for row in &summary.records {
        let slot = per_year.entry(row.year).or_default();
        if row.record.is_forecast {
            slot.1 += 1;
        } else {
            slot.0 += 1;
        }
    }

    let mut lines = vec![
        "# Bid Forecast Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Reference date: {}", summary.reference_date),
        format!(
            "- Policy: horizon {}y, cycle adjustment {}m, cutoff {:?}",
            summary.policy.horizon_years, summary.policy.cycle_adjustment_months, summary.policy.cutoff
        ),
        format!("- Observed records: {}", summary.observed),
        format!("- Forecast records: {}", summary.forecasts),
        format!("- Malformed rows: {}", summary.malformed_rows),
        format!("- Skipped sources: {}", summary.skipped.len()),
        String::new(),
        "## Records per year (observed / forecast)".to_string(),
    ];
    for (year, (observed, forecast)) in per_year {
        lines.push(format!("- {year}: {observed} / {forecast}"));
    }
    if !summary.skipped.is_empty() {
        lines.push(String::new());
        lines.push("## Skipped".to_string());
        lines.extend(summary.skipped.iter().map(|s| format!("- {s}")));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Write `brief.md` and `delta.json` into `dir`.
pub async fn write_run_reports<T: Serialize>(dir: &Path, brief: &str, delta: &T) -> anyhow::Result<()> {
    write_atomic(&dir.join("brief.md"), brief.as_bytes())
        .await
        .context("writing brief.md")?;
    let delta = serde_json::to_vec_pretty(delta).context("serializing run delta")?;
    write_atomic(&dir.join("delta.json"), &delta)
        .await
        .context("writing delta.json")
}

fn bids_batch(records: &[DatedBid]) -> anyhow::Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("organization", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("announced_date", DataType::Utf8, false),
        ArrowField::new("year", DataType::Int32, false),
        ArrowField::new("month", DataType::UInt32, false),
        ArrowField::new("year_month", DataType::Utf8, false),
        ArrowField::new("duration_months", DataType::UInt32, false),
        ArrowField::new("volume_avg", DataType::Float64, false),
        ArrowField::new("contract_amount", DataType::Float64, false),
        ArrowField::new("winning_bidder", DataType::Utf8, false),
        ArrowField::new("winning_amount", DataType::Float64, false),
        ArrowField::new("is_forecast", DataType::Boolean, false),
        ArrowField::new("source_date", DataType::Utf8, true),
        ArrowField::new("forecast_cycle", DataType::UInt32, true),
        ArrowField::new("bid_no", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, false),
    ]));

    let text = |f: fn(&DatedBid) -> &str| StringArray::from(records.iter().map(f).collect::<Vec<_>>());
    let float = |f: fn(&DatedBid) -> f64| Float64Array::from(records.iter().map(f).collect::<Vec<_>>());

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(text(|r| r.record.organization.as_str())),
            Arc::new(text(|r| r.record.title.as_str())),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.record.announced_date.to_string())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(Int32Array::from(records.iter().map(|r| r.year).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(records.iter().map(|r| r.month).collect::<Vec<_>>())),
            Arc::new(text(|r| r.year_month.as_str())),
            Arc::new(UInt32Array::from(
                records.iter().map(|r| r.record.duration_months).collect::<Vec<_>>(),
            )),
            Arc::new(float(|r| r.record.volume_avg)),
            Arc::new(float(|r| r.record.contract_amount)),
            Arc::new(text(|r| r.record.winning_bidder.as_str())),
            Arc::new(float(|r| r.record.winning_amount)),
            Arc::new(BooleanArray::from(
                records.iter().map(|r| r.record.is_forecast).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.record.source_date.map(|d| d.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                records.iter().map(|r| r.record.forecast_cycle).collect::<Vec<_>>(),
            )),
            Arc::new(text(|r| r.record.bid_no.as_str())),
            Arc::new(text(|r| r.record.category.as_str())),
        ],
    )
    .context("building bids record batch")
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

/// `snapshots/bids.parquet` + `snapshots/manifest.json` under `dir`.
pub async fn export_snapshot(dir: &Path, records: &[DatedBid]) -> anyhow::Result<PathBuf> {
    let snapshot_dir = dir.join("snapshots");
    tokio::fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let bids_path = snapshot_dir.join("bids.parquet");
    write_parquet(&bids_path, &bids_batch(records)?)?;

    let bytes = tokio::fs::read(&bids_path)
        .await
        .with_context(|| format!("reading {}", bids_path.display()))?;
    let manifest = SnapshotManifest {
        schema_version: 1,
        files: vec![ManifestFile {
            name: "bids".to_string(),
            path: bids_path
                .strip_prefix(dir)
                .unwrap_or(&bids_path)
                .display()
                .to_string(),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len() as u64,
            rows: records.len(),
        }],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let body = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    write_atomic(&manifest_path, &body).await?;
    Ok(manifest_path)
}

/// Markdown index of the most recent `runs` report directories.
pub fn recent_runs_markdown(reports_root: &Path, runs: usize) -> anyhow::Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Recent Runs".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let brief = dir.path().join("brief.md");
        let title = std::fs::read_to_string(&brief)
            .ok()
            .and_then(|text| text.lines().next().map(|l| l.trim_start_matches("# ").to_string()))
            .unwrap_or_else(|| "unknown run".to_string());
        lines.push(format!("## {} `{}`", title, dir.file_name().to_string_lossy()));
        lines.push(format!("- brief: `{}`", brief.display()));
        let manifest = dir.path().join("snapshots").join("manifest.json");
        if manifest.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
