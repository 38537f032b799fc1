//! Raw tabular rows → canonical [`BidRecord`]s.
//!
//! Rows come from the original CSV exports (Korean headers), from our own
//! canonical CSV, or straight from bid API items. Every column is resolved
//! through [`ALIASES`], so all three shapes normalize the same way.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use crate::BidRecord;

/// One raw row: column name → raw value (string, number or null).
pub type RawRow = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Column {
    Organization,
    Title,
    VolumeAvg,
    DurationMonths,
    ContractAmount,
    WinningBidder,
    WinningAmount,
    Year,
    Month,
    AnnouncedAt,
    BidNo,
    Category,
    IsForecast,
}

impl Column {
    fn name(self) -> &'static str {
        match self {
            Column::Organization => "organization",
            Column::Title => "title",
            Column::VolumeAvg => "volume_avg",
            Column::DurationMonths => "duration_months",
            Column::ContractAmount => "contract_amount",
            Column::WinningBidder => "winning_bidder",
            Column::WinningAmount => "winning_amount",
            Column::Year => "year",
            Column::Month => "month",
            Column::AnnouncedAt => "announced_date",
            Column::BidNo => "bid_no",
            Column::Category => "category",
            Column::IsForecast => "is_forecast",
        }
    }
}

/// Accepted headers per column, in lookup priority order.
const ALIASES: &[(Column, &[&str])] = &[
    (
        Column::Organization,
        &["organization", "실수요기관", "수요기관", "dminsttNm", "ntceInsttNm", "채권자명", "crdtrNm"],
    ),
    (Column::Title, &["title", "공고명", "bidNtceNm"]),
    (Column::VolumeAvg, &["volume_avg", "물동량 평균", "물동량평균"]),
    (Column::DurationMonths, &["duration_months", "용역기간(개월)", "용역기간"]),
    (
        Column::ContractAmount,
        &["contract_amount", "계약 기간 내", "사업금액", "추정가격", "presmptPrce"],
    ),
    (Column::WinningBidder, &["winning_bidder", "입찰결과_1순위", "낙찰업체"]),
    (Column::WinningAmount, &["winning_amount", "입찰금액_1순위", "낙찰금액", "sucsfbidAmt"]),
    (Column::Year, &["year", "년"]),
    (Column::Month, &["month", "월"]),
    (
        Column::AnnouncedAt,
        &["announced_date", "announced_at", "입찰일시", "공고일시", "bidNtceDt"],
    ),
    (Column::BidNo, &["bid_no", "입찰공고번호", "bidNtceNo"]),
    (Column::Category, &["category", "분류"]),
    (Column::IsForecast, &["is_forecast", "예측여부"]),
];

/// Data-quality issue found while normalizing. Always recovered, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRow {
    #[error("row {row}: `{field}` value {raw:?} is not numeric; defaulted to 0")]
    NonNumeric {
        row: usize,
        field: &'static str,
        raw: String,
    },
    #[error("row {row}: `{field}` value {raw:?} is negative; clamped to 0")]
    Negative {
        row: usize,
        field: &'static str,
        raw: String,
    },
    #[error("row {row}: no announcement date could be built; row left out")]
    MissingDate { row: usize },
    /// Forecasts are regenerated from observed rows on every pass.
    #[error("row {row}: flagged as a forecast; row left out")]
    ForecastRow { row: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOutcome {
    pub records: Vec<BidRecord>,
    pub issues: Vec<MalformedRow>,
}

impl NormalizeOutcome {
    pub fn dropped_rows(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| {
                matches!(
                    issue,
                    MalformedRow::MissingDate { .. } | MalformedRow::ForecastRow { .. }
                )
            })
            .count()
    }
}

/// Normalize raw rows. Bad values are coerced to defaults. Rows without any
/// usable date and rows already flagged as forecasts (a merged export read back
/// in) are left out; both are reported in [`NormalizeOutcome::issues`].
pub fn normalize_rows<'a, I>(rows: I) -> NormalizeOutcome
where
    I: IntoIterator<Item = &'a RawRow>,
{
    let mut outcome = NormalizeOutcome::default();
    for (index, row) in rows.into_iter().enumerate() {
        let resolved = ResolvedRow::new(row);
        if resolved.flag(Column::IsForecast) {
            outcome.issues.push(MalformedRow::ForecastRow { row: index });
            continue;
        }
        match normalize_row(index, &resolved, &mut outcome.issues) {
            Some(record) => outcome.records.push(record),
            None => outcome.issues.push(MalformedRow::MissingDate { row: index }),
        }
    }
    if !outcome.issues.is_empty() {
        warn!(
            records = outcome.records.len(),
            issues = outcome.issues.len(),
            dropped = outcome.dropped_rows(),
            "normalized rows with data-quality issues"
        );
    }
    outcome
}

struct ResolvedRow<'a> {
    values: BTreeMap<Column, &'a JsonValue>,
}

impl<'a> ResolvedRow<'a> {
    fn new(row: &'a RawRow) -> Self {
        let cleaned: BTreeMap<&str, &'a JsonValue> = row
            .iter()
            .map(|(k, v)| (k.trim_start_matches('\u{feff}').trim(), v))
            .collect();
        let mut values = BTreeMap::new();
        for (column, aliases) in ALIASES {
            let hit = aliases
                .iter()
                .filter_map(|alias| cleaned.get(alias).copied())
                .find(|v| !v.is_null());
            if let Some(value) = hit {
                values.insert(*column, value);
            }
        }
        Self { values }
    }

    fn get(&self, column: Column) -> Option<&'a JsonValue> {
        self.values.get(&column).copied()
    }

    fn text(&self, column: Column) -> String {
        self.get(column).map(coerce_text).unwrap_or_default()
    }

    fn flag(&self, column: Column) -> bool {
        match self.get(column) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(value) => matches!(
                coerce_text(value).to_ascii_lowercase().as_str(),
                "true" | "1" | "y" | "yes"
            ),
            None => false,
        }
    }

    fn number(&self, row: usize, column: Column, issues: &mut Vec<MalformedRow>) -> f64 {
        let Some(value) = self.get(column) else {
            return 0.0;
        };
        match coerce_number(value) {
            Coerced::Value(v) => v,
            Coerced::Empty => 0.0,
            Coerced::Negative => {
                issues.push(MalformedRow::Negative {
                    row,
                    field: column.name(),
                    raw: coerce_text(value),
                });
                0.0
            }
            Coerced::Invalid => {
                issues.push(MalformedRow::NonNumeric {
                    row,
                    field: column.name(),
                    raw: coerce_text(value),
                });
                0.0
            }
        }
    }
}

fn normalize_row(
    index: usize,
    row: &ResolvedRow<'_>,
    issues: &mut Vec<MalformedRow>,
) -> Option<BidRecord> {
    let announced_date = announced_date(row)?;
    let duration = row.number(index, Column::DurationMonths, issues);
    Some(BidRecord {
        organization: row.text(Column::Organization),
        title: row.text(Column::Title),
        announced_date,
        duration_months: duration.floor().min(u32::MAX as f64) as u32,
        volume_avg: row.number(index, Column::VolumeAvg, issues),
        contract_amount: row.number(index, Column::ContractAmount, issues),
        winning_bidder: row.text(Column::WinningBidder),
        winning_amount: row.number(index, Column::WinningAmount, issues),
        is_forecast: false,
        source_date: None,
        forecast_cycle: None,
        bid_no: row.text(Column::BidNo),
        category: row.text(Column::Category),
    })
}

fn announced_date(row: &ResolvedRow<'_>) -> Option<NaiveDate> {
    if let Some(date) = row
        .get(Column::AnnouncedAt)
        .and_then(|v| parse_timestamp(&coerce_text(v)))
    {
        return Some(date);
    }
    let year = row.get(Column::Year).and_then(|v| parse_year(&coerce_text(v)))?;
    let month = row.get(Column::Month).and_then(|v| parse_month(&coerce_text(v)))?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn coerce_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

enum Coerced {
    Value(f64),
    Empty,
    Negative,
    Invalid,
}

fn coerce_number(value: &JsonValue) -> Coerced {
    match value {
        JsonValue::Null => Coerced::Empty,
        JsonValue::Number(n) => match n.as_f64() {
            Some(v) if v.is_finite() && v >= 0.0 => Coerced::Value(v),
            Some(v) if v.is_finite() => Coerced::Negative,
            _ => Coerced::Invalid,
        },
        JsonValue::String(s) => parse_numeric_text(s),
        _ => Coerced::Invalid,
    }
}

/// Strips separators, units and currency marks: `"1,234,000원"` → 1234000.
fn parse_numeric_text(raw: &str) -> Coerced {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Coerced::Empty;
    }
    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() {
        return Coerced::Invalid;
    }
    match digits.parse::<f64>() {
        Ok(_) if trimmed.starts_with('-') => Coerced::Negative,
        Ok(v) if v.is_finite() => Coerced::Value(v),
        _ => Coerced::Invalid,
    }
}

/// Accepts `YYYY-MM-DD[ HH:MM[:SS]]`, `YYYY/MM/DD`, `YYYY.MM.DD`, ISO `T`
/// timestamps, and compact `YYYYMMDD[HHMM[SS]]`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }
    let date_part = trimmed
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()
        .unwrap_or(trimmed);
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, fmt) {
            return Some(date);
        }
    }
    if date_part.len() >= 8 && date_part.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(&date_part[..8], "%Y%m%d").ok();
    }
    None
}

/// First run of four digits: `"FY2024"` → 2024, `"2024.0"` → 2024.
fn parse_year(raw: &str) -> Option<i32> {
    let mut run = String::new();
    for ch in raw.chars() {
        if ch.is_ascii_digit() {
            run.push(ch);
            if run.len() == 4 {
                return run.parse().ok();
            }
        } else {
            run.clear();
        }
    }
    None
}

/// Leading digits only: `"03"`, `"3월"`, `"3.0"` → 3.
fn parse_month(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let month: u32 = digits.parse().ok()?;
    (1..=12).contains(&month).then_some(month)
}
