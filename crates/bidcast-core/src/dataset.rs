//! The dashboard's working set: normalized records, stored edits, and the
//! merged observed + forecast view derived from them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::edit::apply_edit;
use crate::{
    apply_edits, generate_forecasts_with_report, merge, sort_by_announced, BidEdit, BidRecord,
    DatedBid, EditError, ForecastError, ForecastPolicy,
};

#[derive(Debug, Clone)]
pub struct Dataset {
    observed: Vec<BidRecord>,
    edits: BTreeMap<Uuid, BidEdit>,
    policy: ForecastPolicy,
    reference_date: NaiveDate,
    merged: Vec<DatedBid>,
    skipped: Vec<ForecastError>,
    rejected_edits: Vec<EditError>,
}

impl Dataset {
    /// Layer `edits` over `observed`, forecast, and merge.
    pub fn build(
        observed: Vec<BidRecord>,
        edits: BTreeMap<Uuid, BidEdit>,
        policy: ForecastPolicy,
        reference_date: NaiveDate,
    ) -> Result<Self, ForecastError> {
        policy.validate()?;
        let mut dataset = Self {
            observed,
            edits,
            policy,
            reference_date,
            merged: Vec::new(),
            skipped: Vec::new(),
            rejected_edits: Vec::new(),
        };
        dataset.rebuild()?;
        Ok(dataset)
    }

    fn rebuild(&mut self) -> Result<(), ForecastError> {
        let mut edited = self.observed.clone();
        self.rejected_edits = apply_edits(&mut edited, &self.edits);
        let outcome = generate_forecasts_with_report(&edited, &self.policy, self.reference_date)?;
        let mut merged = merge(edited, outcome.forecasts);
        sort_by_announced(&mut merged);
        self.merged = merged;
        self.skipped = outcome.skipped;
        tracing::debug!(
            records = self.merged.len(),
            skipped = self.skipped.len(),
            "dataset rebuilt"
        );
        Ok(())
    }

    /// Record an edit against an observed record and re-derive forecasts.
    pub fn edit(&mut self, key: Uuid, edit: BidEdit) -> Result<&DatedBid, EditError> {
        if self.find(key).is_some_and(|r| r.record.is_forecast) {
            return Err(EditError::ForecastNotEditable(key));
        }
        let mut trial = self.observed.clone();
        apply_edit(&mut trial, key, &edit)?;

        let layered = match self.edits.get(&key) {
            Some(earlier) => edit.layered_over(*earlier),
            None => edit,
        };
        self.edits.insert(key, layered);
        self.rebuild()?;
        self.find(key).ok_or(EditError::UnknownRecord(key))
    }

    pub fn records(&self) -> &[DatedBid] {
        &self.merged
    }

    pub fn observed(&self) -> &[BidRecord] {
        &self.observed
    }

    pub fn edits(&self) -> &BTreeMap<Uuid, BidEdit> {
        &self.edits
    }

    pub fn policy(&self) -> &ForecastPolicy {
        &self.policy
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn skipped(&self) -> &[ForecastError] {
        &self.skipped
    }

    pub fn rejected_edits(&self) -> &[EditError] {
        &self.rejected_edits
    }

    pub fn find(&self, key: Uuid) -> Option<&DatedBid> {
        self.merged.iter().find(|r| r.record.key() == key)
    }

    pub fn forecast_count(&self) -> usize {
        self.merged.iter().filter(|r| r.record.is_forecast).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ymd;

    fn sample() -> Dataset {
        let observed = vec![
            BidRecord::observed("서울시", "120 콜센터", ymd(2024, 3, 1)).with_duration(12),
            BidRecord::observed("경기도", "민원 상담", ymd(2024, 6, 1)),
        ];
        Dataset::build(
            observed,
            BTreeMap::new(),
            ForecastPolicy::new(3, 0),
            ymd(2024, 1, 1),
        )
        .unwrap()
    }

    #[test]
    fn build_merges_sorted_observed_and_forecasts() {
        let dataset = sample();
        assert_eq!(dataset.forecast_count(), 3);
        assert_eq!(dataset.records().len(), 5);
        let dates: Vec<_> = dataset
            .records()
            .iter()
            .map(|r| r.record.announced_date)
            .collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[test]
    fn duration_edit_reprojects_forecasts() {
        let mut dataset = sample();
        let key = dataset.observed()[1].key();
        let edited = dataset
            .edit(
                key,
                BidEdit {
                    duration_months: Some(24),
                    ..BidEdit::default()
                },
            )
            .unwrap();
        assert_eq!(edited.record.duration_months, 24);
        // 2026-06 is the only cycle inside the 2027 horizon
        assert_eq!(dataset.forecast_count(), 4);
        assert_eq!(
            dataset.edits().get(&key).and_then(|e| e.duration_months),
            Some(24)
        );
    }

    #[test]
    fn forecast_records_cannot_be_edited() {
        let mut dataset = sample();
        let forecast_key = dataset
            .records()
            .iter()
            .find(|r| r.record.is_forecast)
            .map(|r| r.record.key())
            .unwrap();
        let err = dataset
            .edit(forecast_key, BidEdit::default())
            .unwrap_err();
        assert_eq!(err, EditError::ForecastNotEditable(forecast_key));
        assert!(dataset.edits().is_empty());
    }
}
