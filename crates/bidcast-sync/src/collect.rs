//! Bid collection: first page → page count → bounded fan-out → ordered merge → CSV.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bidcast_adapters::{page_rows, AdapterContext, BidEndpoint, BidSource, SearchConfig};
use bidcast_core::{normalize_rows, BidRecord, RawRow};
use bidcast_storage::append_records;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::CollectionLimits;

#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub search: SearchConfig,
    pub endpoints: Vec<BidEndpoint>,
    pub limits: CollectionLimits,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointSummary {
    pub endpoint: String,
    pub category: String,
    pub total_count: u64,
    pub pages_requested: u32,
    pub pages_failed: u32,
    pub collected: usize,
    /// Collection stopped at `max_items`.
    pub capped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: PathBuf,
    pub endpoints: Vec<EndpointSummary>,
    pub collected: usize,
    pub malformed_rows: usize,
    pub awards_applied: usize,
    #[serde(skip)]
    pub records: Vec<BidRecord>,
}

pub struct CollectPipeline {
    source: Arc<dyn BidSource>,
    max_workers: usize,
}

impl CollectPipeline {
    pub fn new(source: Arc<dyn BidSource>, max_workers: usize) -> Self {
        Self {
            source,
            max_workers: max_workers.max(1),
        }
    }

    pub async fn run_once(&self, request: &CollectRequest) -> anyhow::Result<CollectSummary> {
        request.search.validate()?;
        let started_at = Utc::now();
        let ctx = AdapterContext::new(started_at);

        let mut endpoints = Vec::with_capacity(request.endpoints.len());
        let mut rows = Vec::new();
        for endpoint in &request.endpoints {
            let span = info_span!("collect_endpoint", run_id = %ctx.run_id, endpoint = %endpoint.path);
            let (summary, endpoint_rows) = self
                .collect_endpoint(&ctx, endpoint, request)
                .instrument(span)
                .await?;
            endpoints.push(summary);
            rows.extend(endpoint_rows);
        }

        let outcome = normalize_rows(&rows);
        let mut records = outcome.records;
        let awards_applied = if request.limits.fetch_awards {
            self.apply_awards(&ctx, &request.search, &mut records).await
        } else {
            0
        };

        let mut saved = 0usize;
        for chunk in records.chunks(request.limits.save_interval.max(1)) {
            saved += append_records(&request.output, chunk)
                .await
                .with_context(|| format!("saving rows to {}", request.output.display()))?;
            info!(saved, total = records.len(), output = %request.output.display(), "saved rows");
        }

        Ok(CollectSummary {
            run_id: ctx.run_id,
            started_at,
            finished_at: Utc::now(),
            output: request.output.clone(),
            endpoints,
            collected: saved,
            malformed_rows: outcome.issues.len(),
            awards_applied,
            records,
        })
    }

    async fn collect_endpoint(
        &self,
        ctx: &AdapterContext,
        endpoint: &BidEndpoint,
        request: &CollectRequest,
    ) -> anyhow::Result<(EndpointSummary, Vec<RawRow>)> {
        let limits = &request.limits;
        let mut summary = EndpointSummary {
            endpoint: endpoint.path.clone(),
            category: endpoint.category.clone(),
            ..EndpointSummary::default()
        };

        let first = match self
            .source
            .fetch_page(ctx, endpoint, &request.search, 1, limits.per_page)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                warn!(error = %err, "first page failed; skipping endpoint");
                summary.pages_requested = 1;
                summary.pages_failed = 1;
                return Ok((summary, Vec::new()));
            }
        };
        summary.total_count = first.total_count;
        let required = first.required_pages(limits.per_page, limits.max_pages);
        summary.pages_requested = required.max(1);
        info!(total_count = first.total_count, pages = required, "endpoint search sized");

        let mut collected = Vec::new();
        summary.capped = push_capped(
            &mut collected,
            page_rows(&first, endpoint, &request.search),
            limits.max_items,
        );

        let mut next_page = 2u32;
        while next_page <= required && !summary.capped {
            let wave_end = next_page
                .saturating_add(self.max_workers as u32 - 1)
                .min(required);
            let wave = self.fetch_wave(ctx, endpoint, request, next_page..=wave_end).await?;
            for (page_no, result) in wave {
                match result {
                    Ok(rows) => {
                        summary.capped = push_capped(&mut collected, rows, limits.max_items);
                        if summary.capped {
                            info!(page_no, max_items = limits.max_items, "reached item cap");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(page_no, error = %err, "page failed; continuing");
                        summary.pages_failed += 1;
                    }
                }
            }
            next_page = wave_end + 1;
        }

        summary.collected = collected.len();
        info!(collected = summary.collected, failed = summary.pages_failed, "endpoint collected");
        Ok((summary, collected))
    }

    /// Fetch pages concurrently; each task owns its buffer and results come
    /// back keyed by page number so the merge is page-ordered.
    async fn fetch_wave(
        &self,
        ctx: &AdapterContext,
        endpoint: &BidEndpoint,
        request: &CollectRequest,
        pages: std::ops::RangeInclusive<u32>,
    ) -> anyhow::Result<BTreeMap<u32, Result<Vec<RawRow>, String>>> {
        let mut tasks = JoinSet::new();
        for page_no in pages {
            let source = Arc::clone(&self.source);
            let ctx = ctx.clone();
            let endpoint = endpoint.clone();
            let search = request.search.clone();
            let per_page = request.limits.per_page;
            tasks.spawn(async move {
                let result = source
                    .fetch_page(&ctx, &endpoint, &search, page_no, per_page)
                    .await
                    .map(|page| page_rows(&page, &endpoint, &search))
                    .map_err(|err| err.to_string());
                (page_no, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (page_no, result) = joined.context("page task panicked")?;
            results.insert(page_no, result);
        }
        Ok(results)
    }

    async fn apply_awards(
        &self,
        ctx: &AdapterContext,
        search: &SearchConfig,
        records: &mut [BidRecord],
    ) -> usize {
        let mut applied = 0;
        for record in records.iter_mut().filter(|r| !r.bid_no.is_empty()) {
            match self.source.fetch_winning_bid(ctx, &record.bid_no, search).await {
                Ok(Some(award)) => {
                    award.apply_to(record);
                    applied += 1;
                }
                Ok(None) => {}
                Err(err) => warn!(bid_no = %record.bid_no, error = %err, "award lookup failed"),
            }
        }
        applied
    }
}

/// Append until `cap` is reached; returns whether the cap was hit.
fn push_capped(out: &mut Vec<RawRow>, rows: Vec<RawRow>, cap: usize) -> bool {
    let room = cap.saturating_sub(out.len());
    out.extend(rows.into_iter().take(room));
    out.len() >= cap
}
