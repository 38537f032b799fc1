//! Recurring-bid forecasting.
//!
//! A contract that runs for `duration_months` is expected to be re-announced
//! when it ends, so every observed record with a known duration is projected
//! forward one cycle at a time until the horizon ceiling. Years that already
//! hold observed announcements never receive forecasts.
//!
//! Cycle `k` lands on `announced_date + k * cycle_length` months, measured from
//! the source record each time, so month-end clamping never accumulates.

use std::collections::BTreeSet;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{BidRecord, FORECAST_SENTINEL, FORECAST_TITLE_MARKER};

/// How the horizon ceiling is compared against candidate dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizonCutoff {
    /// Stop once `candidate.year > reference.year + horizon_years`.
    #[default]
    YearEnd,
    /// Stop once `candidate > reference + horizon_years` (same day and month).
    Anniversary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastPolicy {
    pub horizon_years: u32,
    /// Months subtracted from the duration to model re-announcement shortly
    /// before the contract ends. Only 0 and 1 are accepted.
    pub cycle_adjustment_months: u32,
    pub cutoff: HorizonCutoff,
}

impl Default for ForecastPolicy {
    fn default() -> Self {
        Self {
            horizon_years: 30,
            cycle_adjustment_months: 0,
            cutoff: HorizonCutoff::YearEnd,
        }
    }
}

impl ForecastPolicy {
    pub const MAX_CYCLE_ADJUSTMENT_MONTHS: u32 = 1;
    pub const MAX_HORIZON_YEARS: u32 = 100;

    pub fn new(horizon_years: u32, cycle_adjustment_months: u32) -> Self {
        Self {
            horizon_years,
            cycle_adjustment_months,
            ..Self::default()
        }
    }

    pub fn with_cutoff(mut self, cutoff: HorizonCutoff) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.cycle_adjustment_months > Self::MAX_CYCLE_ADJUSTMENT_MONTHS {
            return Err(ForecastError::InvalidPolicy(format!(
                "cycle_adjustment_months must be 0 or 1 (got {})",
                self.cycle_adjustment_months
            )));
        }
        if self.horizon_years > Self::MAX_HORIZON_YEARS {
            return Err(ForecastError::InvalidPolicy(format!(
                "horizon_years must be at most {} (got {})",
                Self::MAX_HORIZON_YEARS,
                self.horizon_years
            )));
        }
        Ok(())
    }

    /// Effective months between re-announcements, never below 1.
    pub fn cycle_length(&self, duration_months: u32) -> u32 {
        duration_months
            .saturating_sub(self.cycle_adjustment_months)
            .max(1)
    }

    fn ceiling(&self, reference_date: NaiveDate) -> Ceiling {
        let year = reference_date.year() + self.horizon_years as i32;
        match self.cutoff {
            HorizonCutoff::YearEnd => Ceiling { year, date: None },
            HorizonCutoff::Anniversary => Ceiling {
                year,
                date: Some(
                    reference_date
                        .checked_add_months(Months::new(self.horizon_years * 12))
                        .unwrap_or(NaiveDate::MAX),
                ),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForecastError {
    #[error("forecast for {title:?} ({source_date}) exceeded the {cap}-cycle cap")]
    UnboundedForecast {
        title: String,
        source_date: NaiveDate,
        cap: u32,
    },
    #[error("forecast for {title:?} ({source_date}) overflowed the calendar at cycle {cycle}")]
    DateOverflow {
        title: String,
        source_date: NaiveDate,
        cycle: u32,
    },
    #[error("invalid forecast policy: {0}")]
    InvalidPolicy(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastOutcome {
    pub forecasts: Vec<BidRecord>,
    /// Records whose generation was aborted; the rest of the batch still ran.
    pub skipped: Vec<ForecastError>,
}

#[derive(Debug, Clone, Copy)]
struct Ceiling {
    year: i32,
    date: Option<NaiveDate>,
}

impl Ceiling {
    fn passed_by(&self, candidate: NaiveDate) -> bool {
        match self.date {
            Some(limit) => candidate > limit,
            None => candidate.year() > self.year,
        }
    }

    /// Upper bound on cycles for a record starting at `start`: the number of
    /// one-month steps that fit before the ceiling year ends, plus the step
    /// that crosses it.
    fn cycle_cap(&self, start: NaiveDate) -> u32 {
        let years = (self.year - start.year() + 1).max(0) as u32;
        years.saturating_mul(12).saturating_add(1)
    }
}

/// Project future re-announcements of every observed record with a known
/// duration. See [`generate_forecasts_with_report`] for per-record diagnostics.
pub fn generate_forecasts(
    records: &[BidRecord],
    policy: &ForecastPolicy,
    reference_date: NaiveDate,
) -> Result<Vec<BidRecord>, ForecastError> {
    generate_forecasts_with_report(records, policy, reference_date).map(|o| o.forecasts)
}

pub fn generate_forecasts_with_report(
    records: &[BidRecord],
    policy: &ForecastPolicy,
    reference_date: NaiveDate,
) -> Result<ForecastOutcome, ForecastError> {
    policy.validate()?;

    let observed_years: BTreeSet<i32> = records
        .iter()
        .filter(|r| !r.is_forecast)
        .map(|r| r.year())
        .collect();
    let ceiling = policy.ceiling(reference_date);

    let mut outcome = ForecastOutcome::default();
    let mut sources = 0usize;
    for record in records
        .iter()
        .filter(|r| !r.is_forecast && r.duration_months > 0)
    {
        sources += 1;
        let cycle = policy.cycle_length(record.duration_months);
        match project(record, cycle, ceiling, &observed_years) {
            Ok(mut projected) => outcome.forecasts.append(&mut projected),
            Err(err) => {
                warn!(error = %err, "skipping forecast for record");
                outcome.skipped.push(err);
            }
        }
    }

    debug!(
        %reference_date,
        horizon_years = policy.horizon_years,
        cycle_adjustment_months = policy.cycle_adjustment_months,
        sources,
        forecasts = outcome.forecasts.len(),
        skipped = outcome.skipped.len(),
        "generated forecasts"
    );
    Ok(outcome)
}

fn project(
    source: &BidRecord,
    cycle_months: u32,
    ceiling: Ceiling,
    observed_years: &BTreeSet<i32>,
) -> Result<Vec<BidRecord>, ForecastError> {
    let start = source.announced_date;
    if ceiling.passed_by(start) {
        return Ok(Vec::new());
    }
    let cap = ceiling.cycle_cap(start);
    let mut out = Vec::new();

    for cycle in 1..=cap {
        let overflow = || ForecastError::DateOverflow {
            title: source.title.clone(),
            source_date: start,
            cycle,
        };
        let offset = cycle_months.checked_mul(cycle).ok_or_else(overflow)?;
        let candidate = start
            .checked_add_months(Months::new(offset))
            .ok_or_else(overflow)?;
        if ceiling.passed_by(candidate) {
            return Ok(out);
        }
        if observed_years.contains(&candidate.year()) {
            continue;
        }
        out.push(forecast_record(source, candidate, cycle));
    }

    Err(ForecastError::UnboundedForecast {
        title: source.title.clone(),
        source_date: start,
        cap,
    })
}

fn forecast_record(source: &BidRecord, announced_date: NaiveDate, cycle: u32) -> BidRecord {
    BidRecord {
        title: format!("{} ({} {}차)", source.title, FORECAST_TITLE_MARKER, cycle),
        announced_date,
        winning_bidder: FORECAST_SENTINEL.to_string(),
        winning_amount: 0.0,
        is_forecast: true,
        source_date: Some(source.announced_date),
        forecast_cycle: Some(cycle),
        ..source.clone()
    }
}
