//! CSV datasets: raw reading for the normalizer, canonical writing.
//!
//! Files are written UTF-8 with a BOM so spreadsheet tools open the Korean
//! headers correctly; the BOM is stripped again on read.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use bidcast_core::{BidRecord, DatedBid, RawRow};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::write_atomic;

const BOM: &str = "\u{feff}";

#[derive(Debug, Serialize)]
struct CanonicalRow<'a> {
    organization: &'a str,
    title: &'a str,
    announced_date: NaiveDate,
    duration_months: u32,
    volume_avg: f64,
    contract_amount: f64,
    winning_bidder: &'a str,
    winning_amount: f64,
    bid_no: &'a str,
    category: &'a str,
}

impl<'a> From<&'a BidRecord> for CanonicalRow<'a> {
    fn from(r: &'a BidRecord) -> Self {
        Self {
            organization: &r.organization,
            title: &r.title,
            announced_date: r.announced_date,
            duration_months: r.duration_months,
            volume_avg: r.volume_avg,
            contract_amount: r.contract_amount,
            winning_bidder: &r.winning_bidder,
            winning_amount: r.winning_amount,
            bid_no: &r.bid_no,
            category: &r.category,
        }
    }
}

#[derive(Debug, Serialize)]
struct DatedRow<'a> {
    year: i32,
    month: u32,
    year_month: &'a str,
    organization: &'a str,
    title: &'a str,
    announced_date: NaiveDate,
    duration_months: u32,
    volume_avg: f64,
    contract_amount: f64,
    winning_bidder: &'a str,
    winning_amount: f64,
    is_forecast: bool,
    source_date: Option<NaiveDate>,
    forecast_cycle: Option<u32>,
    bid_no: &'a str,
    category: &'a str,
}

impl<'a> From<&'a DatedBid> for DatedRow<'a> {
    fn from(d: &'a DatedBid) -> Self {
        let r = &d.record;
        Self {
            year: d.year,
            month: d.month,
            year_month: &d.year_month,
            organization: &r.organization,
            title: &r.title,
            announced_date: r.announced_date,
            duration_months: r.duration_months,
            volume_avg: r.volume_avg,
            contract_amount: r.contract_amount,
            winning_bidder: &r.winning_bidder,
            winning_amount: r.winning_amount,
            is_forecast: r.is_forecast,
            source_date: r.source_date,
            forecast_cycle: r.forecast_cycle,
            bid_no: &r.bid_no,
            category: &r.category,
        }
    }
}

fn encode<T: Serialize>(rows: impl IntoIterator<Item = T>, headers: bool) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(headers)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("encoding csv row")?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("flushing csv buffer: {}", err.error()))
}

fn with_bom(mut body: Vec<u8>) -> Vec<u8> {
    let mut out = BOM.as_bytes().to_vec();
    out.append(&mut body);
    out
}

/// Parse a CSV into raw rows keyed by header. Empty cells become `null` so the
/// normalizer can fall through to alias columns.
pub fn read_raw_rows_from<R: Read>(reader: R) -> anyhow::Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .context("reading csv header")?
        .iter()
        .map(|h| h.trim_start_matches(BOM).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading csv row {}", index + 1))?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| {
                let value = if cell.is_empty() {
                    JsonValue::Null
                } else {
                    JsonValue::String(cell.to_string())
                };
                (header.clone(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

pub async fn read_raw_rows(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    read_raw_rows_from(bytes.as_slice()).with_context(|| format!("parsing {}", path.display()))
}

/// Replace `path` with the canonical columns of `records`.
pub async fn write_records(path: &Path, records: &[BidRecord]) -> anyhow::Result<()> {
    let body = encode(records.iter().map(CanonicalRow::from), true)?;
    write_atomic(path, &with_bom(body)).await
}

/// Replace `path` with the merged view, derived keys and forecast markers included.
pub async fn write_dated_records(path: &Path, records: &[DatedBid]) -> anyhow::Result<()> {
    let body = encode(records.iter().map(DatedRow::from), true)?;
    write_atomic(path, &with_bom(body)).await
}

/// Append canonical rows, writing the BOM and header only when the file is new
/// or empty. Returns the number of rows written.
pub async fn append_records(path: &Path, records: &[BidRecord]) -> anyhow::Result<usize> {
    let fresh = match fs::metadata(path).await {
        Ok(meta) => meta.len() == 0,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
        Err(err) => {
            return Err(err).with_context(|| format!("inspecting {}", path.display()));
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }

    let body = encode(records.iter().map(CanonicalRow::from), fresh)?;
    let body = if fresh { with_bom(body) } else { body };
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {} for append", path.display()))?;
    file.write_all(&body)
        .await
        .with_context(|| format!("appending to {}", path.display()))?;
    file.flush().await?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidcast_core::{generate_forecasts, merge, normalize_rows, ForecastPolicy, MalformedRow};
    use tempfile::tempdir;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn sample() -> Vec<BidRecord> {
        let mut first = BidRecord::observed("서울특별시", "120 다산콜센터, 위탁운영", ymd(2024, 3, 1))
            .with_duration(12);
        first.volume_avg = 1520.5;
        first.contract_amount = 3_300_000_000.0;
        first.winning_bidder = "(주)콜센터".to_string();
        first.bid_no = "20240312345".to_string();
        let second = BidRecord::observed("경기도", "민원 상담", ymd(2024, 6, 1));
        vec![first, second]
    }

    #[tokio::test]
    async fn canonical_csv_survives_a_disk_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bids.csv");
        write_records(&path, &sample()).await.expect("write");

        let raw = std::fs::read(&path).expect("read");
        assert!(raw.starts_with(BOM.as_bytes()));

        let rows = read_raw_rows(&path).await.expect("read rows");
        let outcome = normalize_rows(&rows);
        assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
        assert_eq!(outcome.records, sample());
    }

    #[test]
    fn legacy_export_headers_are_read_as_is() {
        let csv = "\u{feff}년,월,실수요기관,공고명,물동량 평균,용역기간(개월),계약 기간 내,입찰결과_1순위,입찰금액_1순위,입찰일시\n\
                   FY2024,3,서울특별시,120 콜센터,\"1,200\",12,\"3,000,000\",,,\n";
        let rows = read_raw_rows_from(csv.as_bytes()).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["년"], JsonValue::String("FY2024".into()));
        assert!(rows[0]["입찰일시"].is_null());

        let outcome = normalize_rows(&rows);
        let record = &outcome.records[0];
        assert_eq!(record.announced_date, ymd(2024, 3, 1));
        assert_eq!(record.volume_avg, 1200.0);
        assert_eq!(record.contract_amount, 3_000_000.0);
    }

    #[tokio::test]
    async fn append_writes_header_once() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("collected.csv");
        let records = sample();
        append_records(&path, &records[..1]).await.expect("first append");
        append_records(&path, &records[1..]).await.expect("second append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.matches("organization,title").count(), 1);
        assert_eq!(text.matches(BOM).count(), 1);
        let rows = read_raw_rows(&path).await.expect("rows");
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn dated_export_marks_forecasts() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("merged.csv");
        let mut projected = sample()[0].clone();
        projected.is_forecast = true;
        projected.source_date = Some(ymd(2024, 3, 1));
        projected.forecast_cycle = Some(1);
        projected.announced_date = ymd(2025, 3, 1);
        write_dated_records(&path, &merge(sample(), vec![projected]))
            .await
            .expect("write");

        let rows = read_raw_rows(&path).await.expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["year_month"], JsonValue::String("2025-03".into()));
        assert_eq!(rows[2]["is_forecast"], JsonValue::String("true".into()));
        assert_eq!(rows[2]["source_date"], JsonValue::String("2024-03-01".into()));
        assert!(rows[0]["source_date"].is_null());
    }

    #[tokio::test]
    async fn merged_export_reloads_as_observed_only() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("forecast.csv");
        let observed = vec![BidRecord::observed("서울특별시", "120 콜센터", ymd(2024, 3, 1)).with_duration(12)];
        let policy = ForecastPolicy::new(3, 0);
        let reference = ymd(2024, 6, 1);
        let first = generate_forecasts(&observed, &policy, reference).expect("forecast");
        assert_eq!(first.len(), 3);
        write_dated_records(&path, &merge(observed.clone(), first.clone()))
            .await
            .expect("write");

        let rows = read_raw_rows(&path).await.expect("rows");
        let outcome = normalize_rows(&rows);
        assert_eq!(outcome.records, observed);
        assert_eq!(
            outcome.issues,
            (1..=3).map(|row| MalformedRow::ForecastRow { row }).collect::<Vec<_>>()
        );

        let again = generate_forecasts(&outcome.records, &policy, reference).expect("forecast");
        assert_eq!(again, first);
    }
}
