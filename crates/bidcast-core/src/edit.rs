//! User corrections to observed records (volume and contract duration).
//!
//! Edits are keyed by [`BidRecord::key`] and layered over the normalized
//! dataset before forecasting, so a changed duration re-projects that
//! record's forecasts on the next rebuild.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{BidRecord, ForecastError};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BidEdit {
    pub volume_avg: Option<f64>,
    pub duration_months: Option<u32>,
}

impl BidEdit {
    pub fn is_empty(&self) -> bool {
        self.volume_avg.is_none() && self.duration_months.is_none()
    }

    pub fn validate(&self) -> Result<(), EditError> {
        match self.volume_avg {
            Some(v) if !v.is_finite() || v < 0.0 => Err(EditError::InvalidValue {
                field: "volume_avg",
                raw: v.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Later fields win; absent fields keep the earlier value.
    pub fn layered_over(self, earlier: BidEdit) -> BidEdit {
        BidEdit {
            volume_avg: self.volume_avg.or(earlier.volume_avg),
            duration_months: self.duration_months.or(earlier.duration_months),
        }
    }

    fn apply_to(&self, record: &mut BidRecord) {
        if let Some(volume) = self.volume_avg {
            record.volume_avg = volume;
        }
        if let Some(months) = self.duration_months {
            record.duration_months = months;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("no record with key {0}")]
    UnknownRecord(Uuid),
    #[error("record {0} is a forecast; edit its source record instead")]
    ForecastNotEditable(Uuid),
    #[error("invalid {field} value `{raw}`")]
    InvalidValue { field: &'static str, raw: String },
    #[error(transparent)]
    Forecast(#[from] ForecastError),
}

/// Apply one edit to the record with `key`.
pub fn apply_edit<'a>(
    records: &'a mut [BidRecord],
    key: Uuid,
    edit: &BidEdit,
) -> Result<&'a BidRecord, EditError> {
    edit.validate()?;
    let record = records
        .iter_mut()
        .find(|r| r.key() == key)
        .ok_or(EditError::UnknownRecord(key))?;
    if record.is_forecast {
        return Err(EditError::ForecastNotEditable(key));
    }
    edit.apply_to(record);
    Ok(record)
}

/// Apply every stored edit; edits that no longer resolve are returned, not fatal.
pub fn apply_edits(records: &mut [BidRecord], edits: &BTreeMap<Uuid, BidEdit>) -> Vec<EditError> {
    let mut index: BTreeMap<Uuid, usize> = BTreeMap::new();
    for (position, record) in records.iter().enumerate() {
        index.entry(record.key()).or_insert(position);
    }

    let mut rejected = Vec::new();
    for (key, edit) in edits {
        let Some(&position) = index.get(key) else {
            rejected.push(EditError::UnknownRecord(*key));
            continue;
        };
        let record = &mut records[position];
        if record.is_forecast {
            rejected.push(EditError::ForecastNotEditable(*key));
            continue;
        }
        if let Err(err) = edit.validate() {
            rejected.push(err);
            continue;
        }
        edit.apply_to(record);
    }

    if !rejected.is_empty() {
        tracing::warn!(rejected = rejected.len(), "stored edits did not apply");
    }
    rejected
}
