//! Collection and forecast pipelines, run reports, and the cron scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bidcast_adapters::{BidSource, G2bSource, SearchConfig};
use bidcast_storage::{
    ArtifactStore, BackoffPolicy, HttpClientConfig, HttpFetcher, JsonEditStore,
};
use chrono::{Local, NaiveDate};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub mod collect;
pub mod config;
pub mod forecast;
pub mod reports;

pub use collect::{CollectPipeline, CollectRequest, CollectSummary, EndpointSummary};
pub use config::{CollectionLimits, ScheduledSearch, ServiceKey, Settings, SyncConfig};
pub use forecast::{
    input_files, load_dataset, load_observed, ForecastPipeline, ForecastRequest, ForecastSummary,
};

pub const CRATE_NAME: &str = "bidcast-sync";

/// Live data.go.kr source built from `config`; fails without a service key.
pub fn build_source(config: &SyncConfig) -> anyhow::Result<Arc<dyn BidSource>> {
    let key = config.require_service_key()?;
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        global_concurrency: config.max_workers.max(1) * 2,
        per_endpoint_concurrency: config.max_workers.max(1),
        backoff: BackoffPolicy::default(),
    })?;
    let source = G2bSource::new(Arc::new(http), key.expose())
        .with_base_urls(&config.bid_base_url, &config.scsbid_base_url)
        .with_artifacts(ArtifactStore::new(&config.artifacts_dir));
    Ok(Arc::new(source))
}

/// Collect `search` into a timestamped CSV under the collected dir, then
/// write the run's brief + delta.
pub async fn run_collect(
    config: &SyncConfig,
    source: Arc<dyn BidSource>,
    search: SearchConfig,
) -> anyhow::Result<CollectSummary> {
    let output = config
        .collected_dir()
        .join(search.output_filename(Local::now().naive_local()));
    let request = CollectRequest {
        search,
        endpoints: config.settings.endpoints.clone(),
        limits: config.settings.collection.clone(),
        output,
    };
    let summary = CollectPipeline::new(source, config.max_workers)
        .run_once(&request)
        .await?;

    let dir = reports::run_dir(&config.reports_dir(), summary.run_id);
    reports::write_run_reports(&dir, &reports::collect_brief(&summary), &summary).await?;
    info!(
        run_id = %summary.run_id,
        collected = summary.collected,
        output = %summary.output.display(),
        "collection finished"
    );
    Ok(summary)
}

pub async fn run_collect_from_env(search: SearchConfig) -> anyhow::Result<CollectSummary> {
    let config = SyncConfig::load()?;
    let source = build_source(&config)?;
    run_collect(&config, source, search).await
}

/// Forecast over everything in the collected dir, with edits from `edits_path`.
pub async fn run_forecast(
    config: &SyncConfig,
    reference_date: NaiveDate,
) -> anyhow::Result<ForecastSummary> {
    let request = ForecastRequest {
        input: config.collected_dir(),
        output: config.data_dir.join("forecast.csv"),
        policy: config.settings.forecast,
        reference_date,
        reports_dir: Some(config.reports_dir()),
    };
    ForecastPipeline::new(Arc::new(JsonEditStore::new(config.edits_path())))
        .run_once(&request)
        .await
}

/// Scheduled collect + forecast for the trailing window ending today.
pub async fn run_scheduled_once(config: &SyncConfig, source: Arc<dyn BidSource>) -> anyhow::Result<()> {
    let today = Local::now().date_naive();
    let search = config.settings.schedule.window_ending(today);
    run_collect(config, source, search).await?;
    run_forecast(config, today).await?;
    Ok(())
}

/// `None` unless `BIDCAST_SCHEDULER_ENABLED` is set. The returned scheduler is
/// not started.
pub async fn maybe_build_scheduler(
    config: Arc<SyncConfig>,
    source: Arc<dyn BidSource>,
) -> anyhow::Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [config.sync_cron_1.clone(), config.sync_cron_2.clone()] {
        let job_config = Arc::clone(&config);
        let job_source = Arc::clone(&source);
        let job = Job::new_async(&cron, move |_uuid, _l| {
            let config = Arc::clone(&job_config);
            let source = Arc::clone(&job_source);
            Box::pin(async move {
                info!("scheduled sync triggered");
                if let Err(err) = run_scheduled_once(&config, source).await {
                    error!(error = %format!("{err:#}"), "scheduled sync failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}
