//! Axum + Askama dashboard over the merged observed + forecast dataset.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Form, Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bidcast_core::{
    max_observed_year, month_sections, query, upcoming, BidEdit, Dataset, EditError, MonthPage,
};
use bidcast_storage::{EditStore, JsonEditStore};
use bidcast_sync::{load_dataset, SyncConfig};
use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub mod pg_edits;
pub mod view;

pub use pg_edits::PgEditStore;
use view::{BidRow, SectionView, YearOption};

pub const CRATE_NAME: &str = "bidcast-web";

pub struct AppState {
    dataset: RwLock<Dataset>,
    edits: Arc<dyn EditStore>,
}

impl AppState {
    pub fn new(dataset: Dataset, edits: Arc<dyn EditStore>) -> Self {
        Self {
            dataset: RwLock::new(dataset),
            edits,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct BidsQuery {
    year: Option<String>,
    month_from: Option<String>,
    month_to: Option<String>,
    org: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    year: Option<String>,
    page: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EditForm {
    volume_avg: Option<String>,
    duration_months: Option<String>,
}

impl EditForm {
    fn into_edit(self) -> Result<BidEdit, EditError> {
        let volume_avg = match blank_to_none(self.volume_avg) {
            Some(raw) => Some(raw.replace(',', "").parse::<f64>().map_err(|_| {
                EditError::InvalidValue {
                    field: "volume_avg",
                    raw: raw.clone(),
                }
            })?),
            None => None,
        };
        let duration_months = match blank_to_none(self.duration_months) {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| EditError::InvalidValue {
                field: "duration_months",
                raw: raw.clone(),
            })?),
            None => None,
        };
        let edit = BidEdit {
            volume_avg,
            duration_months,
        };
        edit.validate()?;
        Ok(edit)
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Lenient query parameter: blank or unparsable means "not given".
fn param<T: FromStr>(value: &Option<String>) -> Option<T> {
    value.as_deref().map(str::trim).and_then(|v| v.parse().ok())
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    year: i32,
    years: Vec<YearOption>,
    organizations: Vec<String>,
    observed_total: usize,
    forecast_total: usize,
    year_total: usize,
    only_forecasts: bool,
    reference_date: String,
}

#[derive(Template)]
#[template(path = "bids_table_partial.html")]
struct BidsTablePartialTemplate {
    year: i32,
    rows: Vec<BidRow>,
    forecast_count: usize,
    only_forecasts: bool,
}

#[derive(Template)]
#[template(path = "month_sections_partial.html")]
struct MonthSectionsPartialTemplate {
    title: String,
    sections: Vec<SectionView>,
    prev: MonthPage,
    next: MonthPage,
}

#[derive(Template)]
#[template(path = "upcoming_partial.html")]
struct UpcomingPartialTemplate {
    year_param: String,
    year_month: String,
    groups: Vec<SectionView>,
    total: usize,
    only_forecasts: bool,
    page: usize,
    pages: usize,
    has_prev: bool,
    has_next: bool,
}

#[derive(Template)]
#[template(path = "bid_detail.html")]
struct BidDetailTemplate {
    row: BidRow,
    editable: bool,
    message: String,
}

#[derive(Template)]
#[template(path = "bid_card_partial.html")]
struct BidCardPartialTemplate {
    row: BidRow,
    editable: bool,
    message: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/year/{year}", get(year_handler))
        .route("/bids", get(bids_table_handler))
        .route("/bids/{key}", get(bid_detail_handler))
        .route("/bids/{key}/edit", post(bid_edit_handler))
        .route("/months", get(months_handler))
        .route("/upcoming", get(upcoming_handler))
        .route("/chart/monthly", get(chart_monthly_handler))
        .with_state(Arc::new(state))
}

/// Pick the edit store: Postgres when `DATABASE_URL` connects, else the JSON
/// file under the data dir.
pub async fn edit_store(config: &SyncConfig) -> Arc<dyn EditStore> {
    if let Some(url) = &config.database_url {
        match PgEditStore::connect(url).await {
            Ok(store) => return Arc::new(store),
            Err(err) => warn!(error = %format!("{err:#}"), "database unavailable; using json edits"),
        }
    }
    Arc::new(JsonEditStore::new(config.edits_path()))
}

pub async fn build_state(config: &SyncConfig, input: &Path, today: NaiveDate) -> anyhow::Result<AppState> {
    let edits = edit_store(config).await;
    let (dataset, outcome) = load_dataset(input, edits.as_ref(), config.settings.forecast, today).await?;
    info!(
        records = dataset.records().len(),
        forecasts = dataset.forecast_count(),
        malformed = outcome.issues.len(),
        "dashboard dataset loaded"
    );
    Ok(AppState::new(dataset, edits))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "dashboard listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::load()?;
    let port: u16 = std::env::var("BIDCAST_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8050);
    let input = std::env::var("BIDCAST_INPUT")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| config.collected_dir());
    let state = build_state(&config, &input, Local::now().date_naive()).await?;
    serve(state, port).await
}

fn default_year(dataset: &Dataset) -> i32 {
    let current = dataset.reference_date().year();
    if dataset.records().iter().any(|r| r.year == current) {
        current
    } else {
        max_observed_year(dataset.records()).unwrap_or(current)
    }
}

fn render_index(dataset: &Dataset, year: i32) -> Response {
    let records = dataset.records();
    let mut years: Vec<i32> = records.iter().map(|r| r.year).collect();
    years.push(year);
    years.sort_unstable();
    years.dedup();

    let view = query(records, year, None, None);
    render_html(IndexTemplate {
        year,
        years: years
            .into_iter()
            .map(|value| YearOption {
                value,
                selected: value == year,
            })
            .collect(),
        organizations: bidcast_core::organizations(records, year),
        observed_total: dataset.observed().len(),
        forecast_total: dataset.forecast_count(),
        year_total: view.len(),
        only_forecasts: view.only_forecasts,
        reference_date: dataset.reference_date().to_string(),
    })
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let dataset = state.dataset.read().await;
    render_index(&dataset, default_year(&dataset))
}

async fn year_handler(State(state): State<Arc<AppState>>, AxumPath(year): AxumPath<String>) -> Response {
    let Ok(year) = year.trim().parse::<i32>() else {
        return not_found("Unknown year");
    };
    let dataset = state.dataset.read().await;
    render_index(&dataset, year)
}

async fn bids_table_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BidsQuery>,
) -> Response {
    let dataset = state.dataset.read().await;
    let year = param(&params.year).unwrap_or_else(|| default_year(&dataset));
    let range = match (param::<u32>(&params.month_from), param::<u32>(&params.month_to)) {
        (None, None) => None,
        (from, to) => Some((from.unwrap_or(1), to.unwrap_or(12))),
    };
    let view = query(dataset.records(), year, range, params.org.as_deref());

    let mut resp = render_html(BidsTablePartialTemplate {
        year,
        rows: view::rows(&view.records),
        forecast_count: view.forecast_count(),
        only_forecasts: view.only_forecasts,
    });
    resp.headers_mut().insert(
        header::HeaderName::from_static("hx-trigger"),
        header::HeaderValue::from_static("bidsTableLoaded"),
    );
    resp
}

async fn months_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
) -> Response {
    let dataset = state.dataset.read().await;
    let year = param(&params.year).unwrap_or_else(|| default_year(&dataset));
    let page = match param::<usize>(&params.page) {
        Some(group) => MonthPage::new(year, group),
        None => MonthPage::opening(year, dataset.reference_date()),
    };
    let sections = month_sections(dataset.records(), page);
    render_html(MonthSectionsPartialTemplate {
        title: format!(
            "{}-{:02} ~ {}-{:02}",
            page.year,
            page.first_month(),
            page.year,
            page.last_month()
        ),
        sections: sections.iter().map(SectionView::from).collect(),
        prev: page.prev(),
        next: page.next(),
    })
}

async fn upcoming_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
) -> Response {
    let dataset = state.dataset.read().await;
    let year: Option<i32> = param(&params.year);
    let panel = upcoming(
        dataset.records(),
        dataset.reference_date(),
        year,
        param(&params.page),
    );
    let pages = panel.months.len();
    render_html(UpcomingPartialTemplate {
        year_param: year.map(|y| y.to_string()).unwrap_or_default(),
        year_month: panel.year_month.clone().unwrap_or_default(),
        groups: panel.organizations.iter().map(SectionView::from).collect(),
        total: panel.total,
        only_forecasts: panel.only_forecasts,
        page: panel.page,
        pages,
        has_prev: panel.page > 0 && pages > 0,
        has_next: panel.page + 1 < pages,
    })
}

async fn chart_monthly_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
) -> Response {
    let dataset = state.dataset.read().await;
    let year = param(&params.year).unwrap_or_else(|| default_year(&dataset));
    let view = query(dataset.records(), year, None, None);

    let mut observed = [0usize; 12];
    let mut forecast = [0usize; 12];
    for row in &view.records {
        let slot = row.month.clamp(1, 12) as usize - 1;
        if row.record.is_forecast {
            forecast[slot] += 1;
        } else {
            observed[slot] += 1;
        }
    }
    let x = (1..=12).map(|m| format!("{m}월")).collect::<Vec<_>>();
    Json(serde_json::json!({
        "data": [
            {"type": "bar", "name": "공고", "x": x, "y": observed, "marker": {"color": "#0ea5e9"}},
            {"type": "bar", "name": "예측", "x": x, "y": forecast, "marker": {"color": "#f97316"}}
        ],
        "layout": {
            "title": format!("{year}년 월별 입찰 공고"),
            "barmode": "stack",
            "paper_bgcolor": "#ffffff",
            "plot_bgcolor": "#f8fafc"
        }
    }))
    .into_response()
}

async fn bid_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(key): AxumPath<String>,
) -> Response {
    let Ok(key) = Uuid::parse_str(key.trim()) else {
        return not_found("Bid not found");
    };
    let dataset = state.dataset.read().await;
    match dataset.find(key) {
        Some(row) => render_html(BidDetailTemplate {
            editable: !row.record.is_forecast,
            row: BidRow::from(row),
            message: String::new(),
        }),
        None => not_found("Bid not found"),
    }
}

async fn bid_edit_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(key): AxumPath<String>,
    Form(form): Form<EditForm>,
) -> Response {
    let Ok(key) = Uuid::parse_str(key.trim()) else {
        return not_found("Bid not found");
    };
    let edit = match form.into_edit() {
        Ok(edit) if edit.is_empty() => return unprocessable("Enter a volume or a duration"),
        Ok(edit) => edit,
        Err(err) => return edit_error(err),
    };

    // Edit a copy, persist, then swap so a failed save leaves the dashboard as it was.
    let mut dataset = state.dataset.write().await;
    let mut next = dataset.clone();
    let row = match next.edit(key, edit) {
        Ok(row) => BidRow::from(row),
        Err(err) => return edit_error(err),
    };
    let stored = next.edits().get(&key).copied().unwrap_or(edit);
    if let Err(err) = state.edits.save(key, stored).await {
        return server_error(err);
    }
    let forecasts = next.forecast_count();
    *dataset = next;
    drop(dataset);

    info!(%key, volume_avg = ?stored.volume_avg, duration_months = ?stored.duration_months, forecasts, "bid edited");
    render_html(BidCardPartialTemplate {
        row,
        editable: true,
        message: "Saved".to_string(),
    })
}

fn edit_error(err: EditError) -> Response {
    match err {
        EditError::UnknownRecord(_) => not_found("Bid not found"),
        EditError::ForecastNotEditable(_) | EditError::InvalidValue { .. } => unprocessable(&err.to_string()),
        EditError::Forecast(err) => server_error(err.into()),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err:#}")),
    )
        .into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Html(message.to_string())).into_response()
}

fn unprocessable(message: &str) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Html(message.to_string())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    use axum::body::Body;
    use bidcast_core::{BidRecord, ForecastPolicy};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn encode(value: &str) -> String {
        value.bytes().fold(String::new(), |mut out, b| {
            let _ = write!(out, "%{b:02X}");
            out
        })
    }

    fn call_center() -> BidRecord {
        let mut record = BidRecord::observed("서울특별시", "120 다산콜센터 위탁운영", ymd(2024, 3, 1))
            .with_duration(12);
        record.contract_amount = 3_300_000_000.0;
        record.volume_avg = 1520.5;
        record
    }

    fn test_state(dir: &Path) -> AppState {
        let records = vec![
            call_center(),
            BidRecord::observed("국민건강보험공단", "고객센터 운영", ymd(2024, 7, 15)),
        ];
        let edits: Arc<dyn EditStore> = Arc::new(JsonEditStore::new(dir.join("user_inputs.json")));
        let dataset = Dataset::build(records, Default::default(), ForecastPolicy::new(3, 0), ymd(2024, 6, 1))
            .expect("dataset");
        AppState::new(dataset, edits)
    }

    async fn body_text(resp: Response) -> String {
        let body = resp.into_body().collect().await.expect("body").to_bytes();
        String::from_utf8(body.to_vec()).expect("utf8")
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn post_form(uri: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn handler_smoke_get_index_and_year() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(test_state(dir.path()));
        let resp = app.clone().oneshot(get("/")).await.expect("index");
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Bid Forecast Dashboard"));
        assert!(text.contains("서울특별시"));

        let resp = app.oneshot(get("/year/2027")).await.expect("year");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("Predictions only"));
    }

    #[tokio::test]
    async fn bids_table_filters_by_org_and_marks_forecasts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(test_state(dir.path()));

        let uri = format!("/bids?year=2024&month_from=&month_to=&org={}", encode("국민건강보험공단"));
        let resp = app.clone().oneshot(get(&uri)).await.expect("table");
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("고객센터 운영"));
        assert!(!text.contains("다산콜센터"));

        let text = body_text(app.clone().oneshot(get("/bids?year=2026")).await.expect("forecast year")).await;
        assert!(text.contains("예측 2차"));

        let text = body_text(app.oneshot(get("/bids?year=2031")).await.expect("empty year")).await;
        assert!(text.contains("No data"));
    }

    #[tokio::test]
    async fn handler_smoke_months_upcoming_and_chart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(test_state(dir.path()));

        let resp = app.clone().oneshot(get("/months?year=2024&page=1")).await.expect("months");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("2024-07"));

        let resp = app.clone().oneshot(get("/upcoming")).await.expect("upcoming");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("2024-07"));

        let resp = app.oneshot(get("/chart/monthly?year=2025")).await.expect("chart");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE].to_str().expect("ct"), "application/json");
        let chart: serde_json::Value = serde_json::from_str(&body_text(resp).await).expect("json");
        assert_eq!(chart["data"][1]["y"][2], 1);
    }

    #[tokio::test]
    async fn detail_lookup_rejects_unknown_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app(test_state(dir.path()));
        let key = call_center().key();

        let resp = app.clone().oneshot(get(&format!("/bids/{key}"))).await.expect("detail");
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("3,300,000,000"));
        assert!(text.contains("<dd>1,521</dd>"));
        assert!(text.contains(r#"name="volume_avg" value="1520.5""#));

        let resp = app.clone().oneshot(get(&format!("/bids/{}", Uuid::nil()))).await.expect("unknown");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = app.oneshot(get("/bids/not-a-key")).await.expect("garbage");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_reprojects_forecasts_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let store = JsonEditStore::new(dir.path().join("user_inputs.json"));
        let app = app(state);
        let key = call_center().key();

        let resp = app
            .clone()
            .oneshot(post_form(&format!("/bids/{key}/edit"), "volume_avg=1%2C500&duration_months=6"))
            .await
            .expect("edit");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("Saved"));

        let saved = store.load().await.expect("load");
        assert_eq!(saved[&key].duration_months, Some(6));
        assert_eq!(saved[&key].volume_avg, Some(1500.0));

        // a six-month cycle now lands a forecast in 2025-03 and 2025-09
        let text = body_text(app.oneshot(get("/bids?year=2025")).await.expect("table")).await;
        assert!(text.contains("2025-09-01"));
    }

    #[tokio::test]
    async fn rejected_edits_map_to_client_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let forecast_key = {
            let dataset = state.dataset.read().await;
            dataset
                .records()
                .iter()
                .find(|r| r.record.is_forecast)
                .map(|r| r.record.key())
                .expect("forecast")
        };
        let app = app(state);
        let key = call_center().key();

        let resp = app
            .clone()
            .oneshot(post_form(&format!("/bids/{key}/edit"), "duration_months=abc"))
            .await
            .expect("bad value");
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = app
            .clone()
            .oneshot(post_form(&format!("/bids/{forecast_key}/edit"), "duration_months=6"))
            .await
            .expect("forecast edit");
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = app
            .oneshot(post_form(&format!("/bids/{}/edit", Uuid::nil()), "duration_months=6"))
            .await
            .expect("unknown");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
