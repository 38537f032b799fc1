//! CSV → normalize → stored edits → forecast → merged CSV + run reports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bidcast_core::{normalize_rows, Dataset, DatedBid, ForecastPolicy, NormalizeOutcome, RawRow};
use bidcast_storage::{read_raw_rows, write_dated_records, EditStore};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::reports;

/// CSV inputs under `input`: the file itself, or every `*.csv` in the
/// directory in name order.
pub fn input_files(input: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = std::fs::read_dir(input)
        .with_context(|| format!("reading {}", input.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

pub async fn load_observed(input: &Path) -> anyhow::Result<NormalizeOutcome> {
    let mut rows: Vec<RawRow> = Vec::new();
    for file in input_files(input)? {
        let file_rows = read_raw_rows(&file).await?;
        info!(file = %file.display(), rows = file_rows.len(), "loaded input csv");
        rows.extend(file_rows);
    }
    let outcome = normalize_rows(&rows);
    for issue in &outcome.issues {
        warn!(%issue, "malformed input row");
    }
    Ok(outcome)
}

/// Observed records from `input`, stored edits layered on, forecasts merged in.
pub async fn load_dataset(
    input: &Path,
    edits: &dyn EditStore,
    policy: ForecastPolicy,
    reference_date: NaiveDate,
) -> anyhow::Result<(Dataset, NormalizeOutcome)> {
    let mut outcome = load_observed(input).await?;
    let stored = edits.load().await.context("loading stored edits")?;
    let observed = std::mem::take(&mut outcome.records);
    let dataset = Dataset::build(observed, stored, policy, reference_date)
        .context("building forecast dataset")?;
    for skipped in dataset.skipped() {
        warn!(error = %skipped, "forecast skipped for record");
    }
    for rejected in dataset.rejected_edits() {
        warn!(error = %rejected, "stored edit not applied");
    }
    Ok((dataset, outcome))
}

#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub policy: ForecastPolicy,
    pub reference_date: NaiveDate,
    /// Write brief, delta and parquet snapshot into `reports_dir/{run_id}`.
    pub reports_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub reference_date: NaiveDate,
    pub policy: ForecastPolicy,
    pub output: PathBuf,
    pub observed: usize,
    pub forecasts: usize,
    pub malformed_rows: usize,
    pub skipped: Vec<String>,
    pub report_dir: Option<PathBuf>,
    pub parquet_manifest: Option<PathBuf>,
    #[serde(skip)]
    pub records: Vec<DatedBid>,
}

pub struct ForecastPipeline {
    edits: Arc<dyn EditStore>,
}

impl ForecastPipeline {
    pub fn new(edits: Arc<dyn EditStore>) -> Self {
        Self { edits }
    }

    pub async fn run_once(&self, request: &ForecastRequest) -> anyhow::Result<ForecastSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let (dataset, outcome) = load_dataset(
            &request.input,
            self.edits.as_ref(),
            request.policy,
            request.reference_date,
        )
        .await?;

        write_dated_records(&request.output, dataset.records())
            .await
            .with_context(|| format!("writing {}", request.output.display()))?;
        info!(
            %run_id,
            records = dataset.records().len(),
            forecasts = dataset.forecast_count(),
            output = %request.output.display(),
            "forecast dataset written"
        );

        let mut summary = ForecastSummary {
            run_id,
            started_at,
            reference_date: request.reference_date,
            policy: request.policy,
            output: request.output.clone(),
            observed: dataset.observed().len(),
            forecasts: dataset.forecast_count(),
            malformed_rows: outcome.issues.len(),
            skipped: dataset.skipped().iter().map(ToString::to_string).collect(),
            report_dir: None,
            parquet_manifest: None,
            records: dataset.records().to_vec(),
        };

        if let Some(root) = &request.reports_dir {
            let dir = reports::run_dir(root, run_id);
            summary.parquet_manifest = Some(reports::export_snapshot(&dir, &summary.records).await?);
            summary.report_dir = Some(dir.clone());
            reports::write_run_reports(&dir, &reports::forecast_brief(&summary), &summary).await?;
        }
        Ok(summary)
    }
}
