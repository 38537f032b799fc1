//! Core bid model plus the normalize → forecast → merge → query pipeline.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod aggregate;
pub mod dataset;
pub mod edit;
pub mod forecast;
pub mod normalize;
pub mod query;

pub use aggregate::{merge, sort_by_announced, DatedBid};
pub use dataset::Dataset;
pub use edit::{apply_edit, apply_edits, BidEdit, EditError};
pub use forecast::{
    generate_forecasts, generate_forecasts_with_report, ForecastError, ForecastOutcome,
    ForecastPolicy, HorizonCutoff,
};
pub use normalize::{normalize_rows, MalformedRow, NormalizeOutcome, RawRow};
pub use query::{
    max_observed_year, month_sections, monthly_counts, organizations, query, upcoming, MonthPage,
    MonthSection, OrganizationBids, QueryView, UpcomingPanel,
};

pub const CRATE_NAME: &str = "bidcast-core";

/// `winning_bidder` value carried by every forecast record.
pub const FORECAST_SENTINEL: &str = "forecast";

/// Word placed in the title suffix of forecast records.
pub const FORECAST_TITLE_MARKER: &str = "예측";

const RECORD_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_52a4_9f3e_4c2d_8d0b_3a7e_11c9_5e20);

/// One observed or forecasted bid announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    pub organization: String,
    pub title: String,
    pub announced_date: NaiveDate,
    pub duration_months: u32,
    pub volume_avg: f64,
    pub contract_amount: f64,
    pub winning_bidder: String,
    pub winning_amount: f64,
    pub is_forecast: bool,
    pub source_date: Option<NaiveDate>,
    /// Generation marker of a forecast record, counted from the source record (cycle 0).
    pub forecast_cycle: Option<u32>,
    #[serde(default)]
    pub bid_no: String,
    #[serde(default)]
    pub category: String,
}

impl BidRecord {
    /// Observed record with every secondary attribute zeroed.
    pub fn observed(
        organization: impl Into<String>,
        title: impl Into<String>,
        announced_date: NaiveDate,
    ) -> Self {
        Self {
            organization: organization.into(),
            title: title.into(),
            announced_date,
            duration_months: 0,
            volume_avg: 0.0,
            contract_amount: 0.0,
            winning_bidder: String::new(),
            winning_amount: 0.0,
            is_forecast: false,
            source_date: None,
            forecast_cycle: None,
            bid_no: String::new(),
            category: String::new(),
        }
    }

    pub fn with_duration(mut self, months: u32) -> Self {
        self.duration_months = months;
        self
    }

    /// Stable identifier used by edit surfaces to address a record.
    pub fn key(&self) -> Uuid {
        let material = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.organization,
            self.title,
            self.announced_date,
            self.forecast_cycle.unwrap_or(0)
        );
        Uuid::new_v5(&RECORD_KEY_NAMESPACE, material.as_bytes())
    }

    pub fn year(&self) -> i32 {
        self.announced_date.year()
    }

    pub fn month(&self) -> u32 {
        self.announced_date.month()
    }

    pub fn year_month(&self) -> String {
        year_month_of(self.announced_date)
    }
}

/// `YYYY-MM` grouping key for a date.
pub fn year_month_of(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

#[cfg(test)]
pub(crate) fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_is_zero_padded() {
        let record = BidRecord::observed("기관", "콜센터 위탁운영", ymd(2024, 3, 15));
        assert_eq!(record.year_month(), "2024-03");
        assert_eq!(record.year(), 2024);
        assert_eq!(record.month(), 3);
    }

    #[test]
    fn record_key_is_stable_and_cycle_aware() {
        let base = BidRecord::observed("기관", "콜센터 위탁운영", ymd(2024, 3, 1));
        assert_eq!(base.key(), base.clone().key());

        let mut projected = base.clone();
        projected.forecast_cycle = Some(1);
        assert_ne!(base.key(), projected.key());
    }
}
