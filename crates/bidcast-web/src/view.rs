//! Display rows for templates. Amounts are grouped with commas; forecast rows
//! show `-` in the award columns.

use bidcast_core::{DatedBid, MonthSection, OrganizationBids};

#[derive(Debug, Clone)]
pub struct BidRow {
    pub key: String,
    pub organization: String,
    pub title: String,
    pub announced_date: String,
    pub year: i32,
    pub year_month: String,
    pub duration_months: u32,
    pub volume_avg: String,
    /// Unrounded volume for the edit form.
    pub volume_input: String,
    pub contract_amount: String,
    pub winning_bidder: String,
    pub winning_amount: String,
    pub is_forecast: bool,
    pub forecast_cycle: String,
    pub source_date: String,
    pub bid_no: String,
    pub category: String,
}

impl From<&DatedBid> for BidRow {
    fn from(row: &DatedBid) -> Self {
        let r = &row.record;
        let (winning_bidder, winning_amount) = if r.is_forecast {
            ("-".to_string(), "-".to_string())
        } else {
            (
                non_empty_or_dash(&r.winning_bidder),
                if r.winning_amount > 0.0 {
                    format_amount(r.winning_amount)
                } else {
                    "-".to_string()
                },
            )
        };
        Self {
            key: r.key().to_string(),
            organization: r.organization.clone(),
            title: r.title.clone(),
            announced_date: r.announced_date.to_string(),
            year: row.year,
            year_month: row.year_month.clone(),
            duration_months: r.duration_months,
            volume_avg: format_amount(r.volume_avg),
            volume_input: r.volume_avg.to_string(),
            contract_amount: format_amount(r.contract_amount),
            winning_bidder,
            winning_amount,
            is_forecast: r.is_forecast,
            forecast_cycle: r.forecast_cycle.map(|c| c.to_string()).unwrap_or_default(),
            source_date: r.source_date.map(|d| d.to_string()).unwrap_or_default(),
            bid_no: non_empty_or_dash(&r.bid_no),
            category: non_empty_or_dash(&r.category),
        }
    }
}

pub fn rows(records: &[DatedBid]) -> Vec<BidRow> {
    records.iter().map(BidRow::from).collect()
}

#[derive(Debug, Clone)]
pub struct SectionView {
    pub label: String,
    pub rows: Vec<BidRow>,
}

impl From<&MonthSection> for SectionView {
    fn from(section: &MonthSection) -> Self {
        Self {
            label: section.year_month.clone(),
            rows: rows(&section.records),
        }
    }
}

impl From<&OrganizationBids> for SectionView {
    fn from(group: &OrganizationBids) -> Self {
        Self {
            label: group.organization.clone(),
            rows: rows(&group.bids),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YearOption {
    pub value: i32,
    pub selected: bool,
}

fn non_empty_or_dash(value: &str) -> String {
    match value.trim() {
        "" => "-".to_string(),
        v => v.to_string(),
    }
}

/// `1234567.8` → `1,234,568`.
pub fn format_amount(value: f64) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if rounded < 0.0 {
        out.insert(0, '-');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidcast_core::BidRecord;
    use chrono::NaiveDate;

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(0.0), "0");
        assert_eq!(format_amount(999.0), "999");
        assert_eq!(format_amount(3_300_000_000.0), "3,300,000,000");
        assert_eq!(format_amount(1234.6), "1,235");
    }

    #[test]
    fn forecast_rows_hide_award_columns() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let mut record = BidRecord::observed("서울특별시", "콜센터 (예측 1차)", date);
        record.is_forecast = true;
        record.winning_bidder = "forecast".into();
        record.forecast_cycle = Some(1);
        let row = BidRow::from(&DatedBid::from(record));
        assert_eq!(row.winning_bidder, "-");
        assert_eq!(row.winning_amount, "-");
        assert_eq!(row.forecast_cycle, "1");
        assert_eq!(row.year_month, "2026-03");
    }

    #[test]
    fn edit_form_keeps_fractional_volume() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date");
        let mut record = BidRecord::observed("서울특별시", "120 콜센터", date);
        record.volume_avg = 1234.6;
        let row = BidRow::from(&DatedBid::from(record));
        assert_eq!(row.volume_avg, "1,235");
        assert_eq!(row.volume_input, "1234.6");
        assert_eq!(row.volume_input.parse::<f64>().expect("number"), 1234.6);
    }
}
