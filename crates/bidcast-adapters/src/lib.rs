//! G2B bid API contract: endpoints, request URLs, envelope parsing, item
//! mapping, and the [`BidSource`] seam with live and fixture implementations.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bidcast_core::RawRow;
use bidcast_storage::{ArtifactStore, FetchError, HttpFetcher};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub mod scsbid;

pub use scsbid::{parse_opening_corp, OpeningCorp, ScsbidQuery, WinningBid};

pub const CRATE_NAME: &str = "bidcast-adapters";

pub const DEFAULT_BID_BASE_URL: &str = "http://apis.data.go.kr/1230000/ad/BidPublicInfoService";
pub const DEFAULT_SCSBID_BASE_URL: &str = "http://apis.data.go.kr/1230000/as/ScsbidInfoService";

const RESULT_CODE_OK: &str = "00";

/// One bid-announcement list operation and the category label its rows carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BidEndpoint {
    pub path: String,
    pub category: String,
}

impl BidEndpoint {
    pub fn new(path: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            category: category.into(),
        }
    }
}

/// Construction, services, goods and foreign procurement.
pub fn default_endpoints() -> Vec<BidEndpoint> {
    vec![
        BidEndpoint::new("getBidPblancListInfoCnstwk", "공사"),
        BidEndpoint::new("getBidPblancListInfoServc", "용역"),
        BidEndpoint::new("getBidPblancListInfoThng", "물품"),
        BidEndpoint::new("getBidPblancListInfoFrgcpt", "외자"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InquiryDivision {
    /// Search window applies to the announcement posting time (`inqryDiv=1`).
    #[default]
    Announced,
    /// Search window applies to the bid opening time (`inqryDiv=2`).
    Opening,
}

impl InquiryDivision {
    pub fn code(self) -> u8 {
        match self {
            InquiryDivision::Announced => 1,
            InquiryDivision::Opening => 2,
        }
    }

    pub fn range_params(self) -> (&'static str, &'static str) {
        match self {
            InquiryDivision::Announced => ("inqryBgnDt", "inqryEndDt"),
            InquiryDivision::Opening => ("opengBgnDt", "opengEndDt"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InquiryDivision::Announced => "공고일",
            InquiryDivision::Opening => "개찰일",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub inquiry: InquiryDivision,
}

impl SearchConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            keyword: None,
            inquiry: InquiryDivision::default(),
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        self.keyword = Some(keyword.trim().to_string()).filter(|k| !k.is_empty());
        self
    }

    pub fn with_inquiry(mut self, inquiry: InquiryDivision) -> Self {
        self.inquiry = inquiry;
        self
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.start_date > self.end_date {
            return Err(AdapterError::Message(format!(
                "search window starts after it ends ({} > {})",
                self.start_date, self.end_date
            )));
        }
        Ok(())
    }

    pub fn window_params(&self) -> (String, String) {
        (
            format!("{}0000", self.start_date.format("%Y%m%d")),
            format!("{}2359", self.end_date.format("%Y%m%d")),
        )
    }

    /// `{keyword}_입찰정보_{division}_{start}_{end}_{stamp}.csv`, keyword prefix optional.
    pub fn output_filename(&self, now: NaiveDateTime) -> String {
        let stem = format!(
            "입찰정보_{}_{}_{}_{}.csv",
            self.inquiry.label(),
            self.start_date.format("%Y%m%d"),
            self.end_date.format("%Y%m%d"),
            now.format("%Y%m%d_%H%M%S")
        );
        match self.keyword.as_deref() {
            Some(keyword) => format!("{}_{}", sanitize_file_part(keyword), stem),
            None => stem,
        }
    }

    pub fn matches_title(&self, title: &str) -> bool {
        self.keyword
            .as_deref()
            .map_or(true, |keyword| title.contains(keyword))
    }
}

fn sanitize_file_part(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("bid api returned result code {code:?}: {message}")]
    Api { code: String, message: String },
    #[error("undecodable bid api response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

impl AdapterError {
    /// Envelope-level failures are retried; transport failures were already
    /// retried by the fetcher.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Api { .. } | AdapterError::Decode(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at,
        }
    }
}

/// One decoded list page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidPage {
    pub total_count: u64,
    pub items: Vec<JsonValue>,
}

impl BidPage {
    pub fn required_pages(&self, per_page: u32, max_pages: u32) -> u32 {
        let per_page = u64::from(per_page.max(1));
        let pages = self.total_count.div_ceil(per_page);
        pages.min(u64::from(max_pages)) as u32
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: Option<EnvelopeResponse>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResponse {
    header: Option<EnvelopeHeader>,
    #[serde(default)]
    body: JsonValue,
}

#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    #[serde(rename = "resultCode", default)]
    result_code: String,
    #[serde(rename = "resultMsg", default)]
    result_msg: String,
}

/// Decode `{"response": {"header": …, "body": {"totalCount", "items"}}}`.
/// `items` may be a list, `{"item": list | object}`, or an empty string.
pub fn parse_envelope(bytes: &[u8]) -> Result<BidPage, AdapterError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    let Some(response) = envelope.response else {
        return Err(AdapterError::Api {
            code: String::new(),
            message: "missing response envelope".to_string(),
        });
    };
    let header = response.header.ok_or_else(|| AdapterError::Api {
        code: String::new(),
        message: "missing response header".to_string(),
    })?;
    if header.result_code.trim() != RESULT_CODE_OK {
        return Err(AdapterError::Api {
            code: header.result_code,
            message: header.result_msg,
        });
    }

    let mut body = response.body;
    let total_count = match body.get("totalCount") {
        Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    let items = match body.get_mut("items").map(JsonValue::take) {
        Some(JsonValue::Array(items)) => items,
        Some(JsonValue::Object(mut wrapper)) => match wrapper.remove("item") {
            Some(JsonValue::Array(items)) => items,
            Some(item @ JsonValue::Object(_)) => vec![item],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(BidPage { total_count, items })
}

fn item_text(item: &JsonValue, key: &str) -> Option<String> {
    match item.get(key)? {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

/// Estimated price plus VAT. Missing parts count as 0; a malformed part voids the sum.
fn contract_amount(item: &JsonValue) -> Option<f64> {
    let part = |key: &str| match item_text(item, key) {
        None => Some(0.0),
        Some(raw) => parse_amount(&raw),
    };
    Some(part("presmptPrce")? + part("VAT")?)
}

/// Map one API item to a canonical raw row. Items without a title, or whose
/// title misses the search keyword, yield `None`.
pub fn item_to_row(item: &JsonValue, endpoint: &BidEndpoint, search: &SearchConfig) -> Option<RawRow> {
    let title = item_text(item, "bidNtceNm")?;
    if !search.matches_title(&title) {
        return None;
    }
    let organization = ["dminsttNm", "ntceInsttNm", "crdtrNm"]
        .iter()
        .find_map(|key| item_text(item, key));

    let text = |value: Option<String>| value.map_or(JsonValue::Null, JsonValue::String);
    let mut row = RawRow::new();
    row.insert("title".to_string(), JsonValue::String(title));
    row.insert("organization".to_string(), text(organization));
    row.insert("announced_date".to_string(), text(item_text(item, "bidNtceDt")));
    row.insert(
        "contract_amount".to_string(),
        contract_amount(item)
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number),
    );
    row.insert("bid_no".to_string(), text(item_text(item, "bidNtceNo")));
    row.insert("category".to_string(), JsonValue::String(endpoint.category.clone()));
    Some(row)
}

pub fn page_rows(page: &BidPage, endpoint: &BidEndpoint, search: &SearchConfig) -> Vec<RawRow> {
    page.items
        .iter()
        .filter_map(|item| item_to_row(item, endpoint, search))
        .collect()
}

/// The service key is appended verbatim (portal keys are usually pre-encoded);
/// every other parameter is form-encoded.
fn base_url_with_key(base_url: &str, path: &str, service_key: &str) -> Result<reqwest::Url, AdapterError> {
    let raw = format!(
        "{}/{}?serviceKey={}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/'),
        service_key
    );
    reqwest::Url::parse(&raw).map_err(|err| AdapterError::Message(format!("invalid api url: {err}")))
}

pub fn bid_list_url(
    base_url: &str,
    service_key: &str,
    endpoint: &BidEndpoint,
    search: &SearchConfig,
    page_no: u32,
    per_page: u32,
) -> Result<reqwest::Url, AdapterError> {
    let mut url = base_url_with_key(base_url, &endpoint.path, service_key)?;
    let (begin_key, end_key) = search.inquiry.range_params();
    let (begin, end) = search.window_params();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("pageNo", &page_no.to_string())
            .append_pair("numOfRows", &per_page.to_string())
            .append_pair("inqryDiv", &search.inquiry.code().to_string())
            .append_pair(begin_key, &begin)
            .append_pair(end_key, &end)
            .append_pair("type", "json");
        if let Some(keyword) = &search.keyword {
            query.append_pair("bidNtceNm", keyword);
        }
    }
    Ok(url)
}

#[async_trait]
pub trait BidSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        endpoint: &BidEndpoint,
        search: &SearchConfig,
        page_no: u32,
        per_page: u32,
    ) -> Result<BidPage, AdapterError>;

    /// Award lookup for one announcement number. Sources without award data return `None`.
    async fn fetch_winning_bid(
        &self,
        _ctx: &AdapterContext,
        _bid_no: &str,
        _search: &SearchConfig,
    ) -> Result<Option<WinningBid>, AdapterError> {
        Ok(None)
    }
}

/// The live data.go.kr source.
#[derive(Debug, Clone)]
pub struct G2bSource {
    http: Arc<HttpFetcher>,
    base_url: String,
    scsbid_base_url: String,
    service_key: String,
    artifacts: Option<ArtifactStore>,
}

impl G2bSource {
    pub fn new(http: Arc<HttpFetcher>, service_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BID_BASE_URL.to_string(),
            scsbid_base_url: DEFAULT_SCSBID_BASE_URL.to_string(),
            service_key: service_key.into(),
            artifacts: None,
        }
    }

    pub fn with_base_urls(mut self, base_url: impl Into<String>, scsbid_base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.scsbid_base_url = scsbid_base_url.into();
        self
    }

    /// Keep every raw response body under `store`.
    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(store);
        self
    }

    async fn fetch_envelope(
        &self,
        ctx: &AdapterContext,
        operation: &str,
        url: &reqwest::Url,
    ) -> Result<BidPage, AdapterError> {
        let backoff = self.http.backoff();
        let mut attempt = 0;
        loop {
            let response = self.http.fetch_bytes(ctx.run_id, operation, url.as_str()).await?;
            if let Some(store) = &self.artifacts {
                if let Err(err) = store
                    .store_page(ctx.fetched_at, operation, "json", &response.body)
                    .await
                {
                    warn!(operation, error = %err, "failed to keep raw response");
                }
            }
            match parse_envelope(&response.body) {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < backoff.max_retries => {
                    warn!(operation, attempt, error = %err, "bid api response rejected; retrying");
                    tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl BidSource for G2bSource {
    fn source_id(&self) -> &str {
        "g2b"
    }

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        endpoint: &BidEndpoint,
        search: &SearchConfig,
        page_no: u32,
        per_page: u32,
    ) -> Result<BidPage, AdapterError> {
        let url = bid_list_url(&self.base_url, &self.service_key, endpoint, search, page_no, per_page)?;
        self.fetch_envelope(ctx, &endpoint.path, &url).await
    }

    async fn fetch_winning_bid(
        &self,
        ctx: &AdapterContext,
        bid_no: &str,
        search: &SearchConfig,
    ) -> Result<Option<WinningBid>, AdapterError> {
        let fetch = |query: ScsbidQuery, classification: Option<String>| async move {
            let url = scsbid::scsbid_url(
                &self.scsbid_base_url,
                &self.service_key,
                query,
                bid_no,
                classification.as_deref(),
                search,
            )?;
            self.fetch_envelope(ctx, query.path(), &url).await
        };

        let amount_page = fetch(ScsbidQuery::Amount, None).await?;
        let opening_page = fetch(ScsbidQuery::OpeningResult, None).await?;
        let mut bid = WinningBid::from_pages(bid_no, &amount_page, &opening_page);

        if bid.winning_amount.is_none() {
            if let Some(classification) = bid.classification_no.clone() {
                let failing = fetch(ScsbidQuery::Failing, Some(classification)).await?;
                bid.nobid_reason = scsbid::first_item_text(&failing, "nobidRsn");
            }
        }
        Ok(Some(bid).filter(|b| !b.is_empty()))
    }
}

/// Canned pages keyed by `(endpoint path, page number)`; used by tests and
/// offline runs. Missing pages decode as empty.
#[derive(Debug, Default)]
pub struct FixtureSource {
    pages: HashMap<(String, u32), Vec<u8>>,
    failures: HashSet<(String, u32)>,
    delays: HashMap<(String, u32), Duration>,
    winning_bids: HashMap<String, WinningBid>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, endpoint: &str, page_no: u32, body: impl Into<Vec<u8>>) -> Self {
        self.pages.insert((endpoint.to_string(), page_no), body.into());
        self
    }

    pub fn with_failure(mut self, endpoint: &str, page_no: u32) -> Self {
        self.failures.insert((endpoint.to_string(), page_no));
        self
    }

    pub fn with_delay(mut self, endpoint: &str, page_no: u32, delay: Duration) -> Self {
        self.delays.insert((endpoint.to_string(), page_no), delay);
        self
    }

    pub fn with_winning_bid(mut self, bid: WinningBid) -> Self {
        self.winning_bids.insert(bid.bid_no.clone(), bid);
        self
    }

    /// Load `{dir}/{endpoint}/page_{n}.json` files plus an optional `winning_bids.json`.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut source = Self::new();
        for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let endpoint = entry.file_name().to_string_lossy().to_string();
            for page in fs::read_dir(entry.path())? {
                let path: PathBuf = page?.path();
                let Some(page_no) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix("page_"))
                    .and_then(|n| n.parse::<u32>().ok())
                else {
                    continue;
                };
                let body = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                source.pages.insert((endpoint.clone(), page_no), body);
            }
        }

        let winning_path = dir.join("winning_bids.json");
        if winning_path.exists() {
            let text = fs::read_to_string(&winning_path)
                .with_context(|| format!("reading {}", winning_path.display()))?;
            let bids: Vec<WinningBid> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", winning_path.display()))?;
            for bid in bids {
                source.winning_bids.insert(bid.bid_no.clone(), bid);
            }
        }
        Ok(source)
    }

    /// Pages requested so far, in request order.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BidSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_page(
        &self,
        _ctx: &AdapterContext,
        endpoint: &BidEndpoint,
        _search: &SearchConfig,
        page_no: u32,
        _per_page: u32,
    ) -> Result<BidPage, AdapterError> {
        let key = (endpoint.path.clone(), page_no);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(&key) {
            return Err(AdapterError::Message(format!(
                "fixture failure for {} page {}",
                endpoint.path, page_no
            )));
        }
        match self.pages.get(&key) {
            Some(body) => parse_envelope(body),
            None => Ok(BidPage::default()),
        }
    }

    async fn fetch_winning_bid(
        &self,
        _ctx: &AdapterContext,
        bid_no: &str,
        _search: &SearchConfig,
    ) -> Result<Option<WinningBid>, AdapterError> {
        Ok(self.winning_bids.get(bid_no).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidcast_core::normalize_rows;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn services() -> BidEndpoint {
        BidEndpoint::new("getBidPblancListInfoServc", "용역")
    }

    fn search() -> SearchConfig {
        SearchConfig::new(ymd(2025, 3, 1), ymd(2025, 4, 1)).with_keyword("콜센터")
    }

    #[test]
    fn list_url_carries_window_paging_and_keyword() {
        let url = bid_list_url(DEFAULT_BID_BASE_URL, "abc%2Bdef", &services(), &search(), 2, 100)
            .expect("url");
        let text = url.as_str();
        assert!(text.starts_with(
            "http://apis.data.go.kr/1230000/ad/BidPublicInfoService/getBidPblancListInfoServc?serviceKey=abc%2Bdef&"
        ));
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["pageNo"], "2");
        assert_eq!(pairs["numOfRows"], "100");
        assert_eq!(pairs["inqryDiv"], "1");
        assert_eq!(pairs["inqryBgnDt"], "202503010000");
        assert_eq!(pairs["inqryEndDt"], "202504012359");
        assert_eq!(pairs["type"], "json");
        assert_eq!(pairs["bidNtceNm"], "콜센터");
    }

    #[test]
    fn opening_division_switches_window_parameter_names() {
        let search = search().with_inquiry(InquiryDivision::Opening);
        let url = bid_list_url(DEFAULT_BID_BASE_URL, "k", &services(), &search, 1, 10).expect("url");
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["inqryDiv"], "2");
        assert_eq!(pairs["opengBgnDt"], "202503010000");
        assert!(!pairs.contains_key("inqryBgnDt"));
    }

    #[test]
    fn envelope_items_accept_every_shape() {
        let list = br#"{"response":{"header":{"resultCode":"00","resultMsg":"OK"},"body":{"totalCount":2,"items":[{"bidNtceNm":"a"},{"bidNtceNm":"b"}]}}}"#;
        let wrapped = br#"{"response":{"header":{"resultCode":"00"},"body":{"totalCount":"1","items":{"item":{"bidNtceNm":"a"}}}}}"#;
        let empty = br#"{"response":{"header":{"resultCode":"00"},"body":{"totalCount":0,"items":""}}}"#;

        assert_eq!(parse_envelope(list).expect("list").items.len(), 2);
        let page = parse_envelope(wrapped).expect("wrapped");
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items.len(), 1);
        assert!(parse_envelope(empty).expect("empty").items.is_empty());
    }

    #[test]
    fn non_ok_result_code_and_garbage_are_retryable_errors() {
        let rejected = br#"{"response":{"header":{"resultCode":"22","resultMsg":"LIMITED NUMBER OF SERVICE REQUESTS EXCEEDS ERROR."}}}"#;
        let err = parse_envelope(rejected).unwrap_err();
        assert!(matches!(&err, AdapterError::Api { code, .. } if code == "22"));
        assert!(err.is_retryable());

        let xml = b"<OpenAPI_ServiceResponse><cmmMsgHeader/></OpenAPI_ServiceResponse>";
        let err = parse_envelope(xml).unwrap_err();
        assert!(matches!(err, AdapterError::Decode(_)));
        assert!(err.is_retryable());
        assert!(!AdapterError::Message("x".into()).is_retryable());
    }

    #[test]
    fn required_pages_is_capped() {
        let page = BidPage {
            total_count: 250,
            items: Vec::new(),
        };
        assert_eq!(page.required_pages(100, 100), 3);
        assert_eq!(page.required_pages(100, 2), 2);
        assert_eq!(BidPage::default().required_pages(100, 100), 0);
    }

    #[test]
    fn items_map_to_rows_with_vat_and_organization_fallback() {
        let item = serde_json::json!({
            "bidNtceNo": "R25BK00000009",
            "bidNtceNm": " 세무 콜센터 운영 ",
            "ntceInsttNm": "국세청",
            "bidNtceDt": "2025-03-20 10:00:00",
            "presmptPrce": "800000000",
            "VAT": "80000000"
        });
        let row = item_to_row(&item, &services(), &search()).expect("row");
        assert_eq!(row["title"], "세무 콜센터 운영");
        assert_eq!(row["organization"], "국세청");
        assert_eq!(row["contract_amount"].as_f64(), Some(880_000_000.0));
        assert_eq!(row["category"], "용역");

        let record = &normalize_rows([&row]).records[0];
        assert_eq!(record.announced_date, ymd(2025, 3, 20));
        assert_eq!(record.bid_no, "R25BK00000009");
    }

    #[test]
    fn untitled_and_off_keyword_items_are_dropped() {
        let untitled = serde_json::json!({"bidNtceNm": "", "bidNtceDt": "2025-03-01"});
        let other = serde_json::json!({"bidNtceNm": "청사 청소 용역"});
        assert!(item_to_row(&untitled, &services(), &search()).is_none());
        assert!(item_to_row(&other, &services(), &search()).is_none());

        let unfiltered = SearchConfig::new(ymd(2025, 3, 1), ymd(2025, 4, 1));
        assert!(item_to_row(&other, &services(), &unfiltered).is_some());
    }

    #[test]
    fn malformed_price_voids_the_amount() {
        let item = serde_json::json!({"bidNtceNm": "콜센터", "presmptPrce": "미정", "VAT": "10"});
        let row = item_to_row(&item, &services(), &search()).expect("row");
        assert!(row["contract_amount"].is_null());
    }

    #[test]
    fn output_filename_names_keyword_division_and_window() {
        let now = ymd(2025, 4, 14).and_hms_opt(15, 50, 35).expect("time");
        assert_eq!(
            search().output_filename(now),
            "콜센터_입찰정보_공고일_20250301_20250401_20250414_155035.csv"
        );
        let plain = SearchConfig::new(ymd(2025, 3, 1), ymd(2025, 4, 1))
            .with_inquiry(InquiryDivision::Opening);
        assert!(plain.output_filename(now).starts_with("입찰정보_개찰일_"));
        assert!(SearchConfig::new(ymd(2025, 4, 2), ymd(2025, 4, 1))
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn fixture_directory_serves_pages_and_awards() {
        let source = FixtureSource::from_dir(workspace_root().join("fixtures").join("g2b"))
            .expect("fixtures");
        let ctx = AdapterContext::new(Utc::now());
        let first = source
            .fetch_page(&ctx, &services(), &search(), 1, 100)
            .await
            .expect("page 1");
        assert_eq!(first.total_count, 250);
        assert_eq!(page_rows(&first, &services(), &search()).len(), 1);

        let missing = source
            .fetch_page(&ctx, &services(), &search(), 9, 100)
            .await
            .expect("missing page");
        assert!(missing.items.is_empty());

        let award = source
            .fetch_winning_bid(&ctx, "R25BK00000001", &search())
            .await
            .expect("award")
            .expect("known bid");
        assert_eq!(award.winner.as_ref().map(|w| w.name.as_str()), Some("(주)한국고객센터"));
        assert_eq!(source.calls().len(), 2);
    }
}
