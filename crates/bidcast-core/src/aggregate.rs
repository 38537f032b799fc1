//! Observed + forecast concatenation with derived calendar keys.

use serde::{Deserialize, Serialize};

use crate::BidRecord;

/// A record together with the grouping keys the presentation layer queries by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedBid {
    #[serde(flatten)]
    pub record: BidRecord,
    pub year: i32,
    pub month: u32,
    pub year_month: String,
}

impl From<BidRecord> for DatedBid {
    fn from(record: BidRecord) -> Self {
        Self {
            year: record.year(),
            month: record.month(),
            year_month: record.year_month(),
            record,
        }
    }
}

/// Concatenate both inputs and derive `year`/`month`/`year_month` from
/// `announced_date`. No deduplication; order is unspecified, see
/// [`sort_by_announced`].
pub fn merge<O, F>(observed: O, forecast: F) -> Vec<DatedBid>
where
    O: IntoIterator<Item = BidRecord>,
    F: IntoIterator<Item = BidRecord>,
{
    observed
        .into_iter()
        .chain(forecast)
        .map(DatedBid::from)
        .collect()
}

pub fn sort_by_announced(records: &mut [DatedBid]) {
    records.sort_by(|a, b| a.record.announced_date.cmp(&b.record.announced_date));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ymd;

    #[test]
    fn derived_keys_apply_to_both_inputs_without_dedup() {
        let observed = vec![BidRecord::observed("기관", "공고", ymd(2024, 12, 5))];
        let mut forecast = BidRecord::observed("기관", "공고", ymd(2025, 1, 5));
        forecast.is_forecast = true;
        let merged = merge(observed.clone(), vec![forecast.clone(), forecast]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].year_month, "2024-12");
        assert_eq!(merged[1].year, 2025);
        assert_eq!(merged[1].month, 1);
        assert_eq!(merged[2].year_month, "2025-01");
    }

    #[test]
    fn flattened_serialization_carries_record_and_keys() {
        let merged = merge(vec![BidRecord::observed("기관", "공고", ymd(2024, 7, 1))], Vec::new());
        let value = serde_json::to_value(&merged[0]).unwrap();
        assert_eq!(value["title"], "공고");
        assert_eq!(value["year_month"], "2024-07");
        assert_eq!(value["announced_date"], "2024-07-01");
    }

    #[test]
    fn sort_orders_by_announced_date() {
        let mut merged = merge(
            vec![
                BidRecord::observed("b", "late", ymd(2025, 5, 1)),
                BidRecord::observed("a", "early", ymd(2024, 1, 1)),
            ],
            Vec::new(),
        );
        sort_by_announced(&mut merged);
        assert_eq!(merged[0].record.title, "early");
    }
}
