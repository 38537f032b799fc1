//! Year/month/organization views over the merged dataset.
//!
//! Every function here is a pure projection; the dashboard calls them per
//! request. A year later than every observed record is a "predictions only"
//! year: only forecast records are returned for it.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::{year_month_of, DatedBid};

/// The year is browsed in three pages of four months.
pub const MONTH_GROUPS: [[u32; 4]; 3] = [[1, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12]];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryView {
    pub year: i32,
    pub records: Vec<DatedBid>,
    /// The year lies beyond the observed data, so only forecasts are shown.
    pub only_forecasts: bool,
}

impl QueryView {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn forecast_count(&self) -> usize {
        self.records.iter().filter(|r| r.record.is_forecast).count()
    }
}

pub fn max_observed_year(records: &[DatedBid]) -> Option<i32> {
    records
        .iter()
        .filter(|r| !r.record.is_forecast)
        .map(|r| r.year)
        .max()
}

fn is_forecast_only_year(records: &[DatedBid], year: i32) -> bool {
    max_observed_year(records).is_some_and(|max| year > max)
}

fn year_rows<'a>(records: &'a [DatedBid], year: i32) -> impl Iterator<Item = &'a DatedBid> + 'a {
    let only_forecasts = is_forecast_only_year(records, year);
    records
        .iter()
        .filter(move |r| r.year == year && (!only_forecasts || r.record.is_forecast))
}

/// Filter by year, an inclusive month range and an exact organization name.
/// Results are sorted by announcement date; no match is an empty view.
pub fn query(
    records: &[DatedBid],
    year: i32,
    month_range: Option<(u32, u32)>,
    organization: Option<&str>,
) -> QueryView {
    let months = month_range.map(|(a, b)| (a.min(b), a.max(b)));
    let organization = organization.map(str::trim).filter(|o| !o.is_empty());

    let mut rows: Vec<DatedBid> = year_rows(records, year)
        .filter(|r| months.map_or(true, |(from, to)| (from..=to).contains(&r.month)))
        .filter(|r| organization.map_or(true, |org| r.record.organization == org))
        .cloned()
        .collect();
    rows.sort_by(|a, b| a.record.announced_date.cmp(&b.record.announced_date));

    QueryView {
        year,
        records: rows,
        only_forecasts: is_forecast_only_year(records, year),
    }
}

/// Announcement counts for January..December of `year`.
pub fn monthly_counts(records: &[DatedBid], year: i32) -> [usize; 12] {
    let mut counts = [0usize; 12];
    for row in year_rows(records, year) {
        if let Some(slot) = (row.month as usize).checked_sub(1).and_then(|i| counts.get_mut(i)) {
            *slot += 1;
        }
    }
    counts
}

/// Sorted, unique organization names for a year.
pub fn organizations(records: &[DatedBid], year: i32) -> Vec<String> {
    let mut names: Vec<String> = year_rows(records, year)
        .map(|r| r.record.organization.clone())
        .filter(|o| !o.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

pub fn month_group_for(month: u32) -> usize {
    (month.clamp(1, 12) as usize - 1) / 4
}

/// Position in the month-group pager. Moving past either end rolls the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthPage {
    pub year: i32,
    pub group: usize,
}

impl MonthPage {
    pub fn new(year: i32, group: usize) -> Self {
        Self {
            year,
            group: group.min(MONTH_GROUPS.len() - 1),
        }
    }

    /// The current year opens on the group holding today's month, other years on January.
    pub fn opening(year: i32, today: NaiveDate) -> Self {
        if year == today.year() {
            Self::new(year, month_group_for(today.month()))
        } else {
            Self::new(year, 0)
        }
    }

    pub fn months(&self) -> [u32; 4] {
        MONTH_GROUPS[self.group]
    }

    pub fn first_month(&self) -> u32 {
        self.months()[0]
    }

    pub fn last_month(&self) -> u32 {
        self.months()[3]
    }

    pub fn prev(&self) -> Self {
        if self.group == 0 {
            Self::new(self.year - 1, MONTH_GROUPS.len() - 1)
        } else {
            Self::new(self.year, self.group - 1)
        }
    }

    pub fn next(&self) -> Self {
        if self.group + 1 >= MONTH_GROUPS.len() {
            Self::new(self.year + 1, 0)
        } else {
            Self::new(self.year, self.group + 1)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSection {
    pub year_month: String,
    pub records: Vec<DatedBid>,
}

/// Months of one pager page that actually hold records, each sorted by title.
pub fn month_sections(records: &[DatedBid], page: MonthPage) -> Vec<MonthSection> {
    let months = page.months();
    let mut grouped: BTreeMap<String, Vec<DatedBid>> = BTreeMap::new();
    for row in records
        .iter()
        .filter(|r| r.year == page.year && months.contains(&r.month))
    {
        grouped.entry(row.year_month.clone()).or_default().push(row.clone());
    }
    grouped
        .into_iter()
        .map(|(year_month, mut records)| {
            records.sort_by(|a, b| a.record.title.cmp(&b.record.title));
            MonthSection { year_month, records }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationBids {
    pub organization: String,
    pub bids: Vec<DatedBid>,
}

/// The "next scheduled bids" panel: one month at a time, grouped by organization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingPanel {
    pub months: Vec<String>,
    pub page: usize,
    pub year_month: Option<String>,
    pub organizations: Vec<OrganizationBids>,
    pub total: usize,
    pub only_forecasts: bool,
}

impl UpcomingPanel {
    pub fn is_empty(&self) -> bool {
        self.year_month.is_none()
    }
}

/// Upcoming months start at the first day of the month after `today`. When
/// `selected_year` lies beyond the observed data, that year's forecasts are
/// paged instead. `page` defaults to the first upcoming month.
pub fn upcoming(
    records: &[DatedBid],
    today: NaiveDate,
    selected_year: Option<i32>,
    page: Option<usize>,
) -> UpcomingPanel {
    let next_month_start = first_of_next_month(today);
    let only_forecasts = selected_year.is_some_and(|y| is_forecast_only_year(records, y));

    let pool: Vec<&DatedBid> = match selected_year {
        Some(year) if only_forecasts => records
            .iter()
            .filter(|r| r.year == year && r.record.is_forecast)
            .collect(),
        _ => records
            .iter()
            .filter(|r| r.record.announced_date >= next_month_start)
            .collect(),
    };

    let mut months: Vec<String> = pool.iter().map(|r| r.year_month.clone()).collect();
    months.sort();
    months.dedup();

    let next_key = year_month_of(next_month_start);
    let default_page = months
        .iter()
        .position(|m| *m >= next_key)
        .unwrap_or_else(|| months.len().saturating_sub(1));
    let page = page
        .unwrap_or(default_page)
        .min(months.len().saturating_sub(1));
    let year_month = months.get(page).cloned();

    let mut by_org: BTreeMap<String, Vec<DatedBid>> = BTreeMap::new();
    if let Some(target) = &year_month {
        for row in pool.iter().filter(|r| &r.year_month == target) {
            by_org
                .entry(row.record.organization.clone())
                .or_default()
                .push((*row).clone());
        }
    }
    let total = by_org.values().map(Vec::len).sum();
    let organizations = by_org
        .into_iter()
        .map(|(organization, mut bids)| {
            bids.sort_by(|a, b| a.record.announced_date.cmp(&b.record.announced_date));
            OrganizationBids { organization, bids }
        })
        .collect();

    UpcomingPanel {
        months,
        page,
        year_month,
        organizations,
        total,
        only_forecasts,
    }
}

fn first_of_next_month(today: NaiveDate) -> NaiveDate {
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{merge, ymd, BidRecord};

    fn observed(org: &str, title: &str, date: NaiveDate) -> BidRecord {
        BidRecord::observed(org, title, date)
    }

    fn projected(org: &str, title: &str, date: NaiveDate) -> BidRecord {
        let mut record = BidRecord::observed(org, title, date);
        record.is_forecast = true;
        record
    }

    fn dataset() -> Vec<DatedBid> {
        merge(
            vec![
                observed("국세청", "126 상담", ymd(2024, 5, 10)),
                observed("경찰청", "112 신고", ymd(2024, 2, 1)),
                observed("국세청", "홈택스 헬프데스크", ymd(2025, 9, 1)),
            ],
            vec![
                projected("국세청", "126 상담 (예측 2차)", ymd(2026, 5, 10)),
                projected("경찰청", "112 신고 (예측 3차)", ymd(2027, 2, 1)),
                projected("경찰청", "112 신고 (예측 2차)", ymd(2026, 2, 1)),
            ],
        )
    }

    #[test]
    fn year_query_is_sorted_and_filtered() {
        let view = query(&dataset(), 2024, None, None);
        let titles: Vec<_> = view.records.iter().map(|r| r.record.title.as_str()).collect();
        assert_eq!(titles, vec!["112 신고", "126 상담"]);
        assert!(!view.only_forecasts);

        let months = query(&dataset(), 2024, Some((4, 1)), None);
        assert_eq!(months.len(), 1);

        let org = query(&dataset(), 2024, None, Some(" 국세청 "));
        assert_eq!(org.records[0].record.title, "126 상담");
    }

    #[test]
    fn empty_year_is_an_empty_view() {
        let view = query(&dataset(), 2019, None, None);
        assert!(view.is_empty());
        assert!(!view.only_forecasts);
    }

    #[test]
    fn far_future_year_only_returns_forecasts() {
        let view = query(&dataset(), 2026, None, None);
        assert!(view.only_forecasts);
        assert_eq!(view.len(), 2);
        assert_eq!(view.forecast_count(), 2);
        assert_eq!(max_observed_year(&dataset()), Some(2025));
    }

    #[test]
    fn monthly_counts_fill_empty_months_with_zero() {
        let counts = monthly_counts(&dataset(), 2024);
        assert_eq!(counts[1], 1);
        assert_eq!(counts[4], 1);
        assert_eq!(counts.iter().sum::<usize>(), 2);
        assert_eq!(monthly_counts(&dataset(), 2030), [0; 12]);
    }

    #[test]
    fn monthly_counts_skip_out_of_range_months() {
        let mut rows = dataset();
        rows[0].month = 0;
        rows[1].month = 13;
        let counts = monthly_counts(&rows, 2024);
        assert_eq!(counts.iter().sum::<usize>(), 0);
    }

    #[test]
    fn organizations_are_unique_and_sorted() {
        assert_eq!(organizations(&dataset(), 2024), vec!["경찰청", "국세청"]);
    }

    #[test]
    fn month_pager_rolls_across_years() {
        let page = MonthPage::opening(2025, ymd(2025, 6, 14));
        assert_eq!(page.group, 1);
        assert_eq!((page.first_month(), page.last_month()), (5, 8));
        assert_eq!(page.next().next(), MonthPage::new(2026, 0));
        assert_eq!(MonthPage::new(2025, 0).prev(), MonthPage::new(2024, 2));
        assert_eq!(MonthPage::opening(2027, ymd(2025, 6, 14)).group, 0);
        assert_eq!(month_group_for(12), 2);
    }

    #[test]
    fn month_sections_only_list_months_with_records() {
        let sections = month_sections(&dataset(), MonthPage::new(2024, 0));
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].year_month, "2024-02");
        assert!(month_sections(&dataset(), MonthPage::new(2023, 0)).is_empty());
    }

    #[test]
    fn upcoming_starts_at_next_month_and_groups_by_organization() {
        let panel = upcoming(&dataset(), ymd(2025, 8, 20), None, None);
        assert_eq!(panel.months, vec!["2025-09", "2026-02", "2026-05", "2027-02"]);
        assert_eq!(panel.year_month.as_deref(), Some("2025-09"));
        assert_eq!(panel.organizations.len(), 1);
        assert_eq!(panel.organizations[0].organization, "국세청");
        assert_eq!(panel.total, 1);

        let third = upcoming(&dataset(), ymd(2025, 8, 20), None, Some(2));
        assert_eq!(third.year_month.as_deref(), Some("2026-05"));

        let clamped = upcoming(&dataset(), ymd(2025, 8, 20), None, Some(99));
        assert_eq!(clamped.year_month.as_deref(), Some("2027-02"));
    }

    #[test]
    fn upcoming_in_forecast_only_year_pages_that_years_forecasts() {
        let panel = upcoming(&dataset(), ymd(2024, 1, 5), Some(2027), None);
        assert!(panel.only_forecasts);
        assert_eq!(panel.months, vec!["2027-02"]);
    }

    #[test]
    fn upcoming_without_future_rows_is_empty() {
        let panel = upcoming(&dataset(), ymd(2030, 12, 31), None, None);
        assert!(panel.is_empty());
        assert_eq!(panel.total, 0);
    }
}
