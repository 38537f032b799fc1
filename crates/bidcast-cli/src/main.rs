use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bidcast_adapters::{InquiryDivision, SearchConfig};
use bidcast_core::{query, HorizonCutoff};
use bidcast_sync::{
    build_source, maybe_build_scheduler, reports, run_collect, ForecastPipeline, ForecastRequest,
    SyncConfig,
};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "bidcast-cli")]
#[command(about = "Public procurement bid collection and re-announcement forecasting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Inquiry {
    Announced,
    Opening,
}

impl From<Inquiry> for InquiryDivision {
    fn from(value: Inquiry) -> Self {
        match value {
            Inquiry::Announced => InquiryDivision::Announced,
            Inquiry::Opening => InquiryDivision::Opening,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Cutoff {
    YearEnd,
    Anniversary,
}

impl From<Cutoff> for HorizonCutoff {
    fn from(value: Cutoff) -> Self {
        match value {
            Cutoff::YearEnd => HorizonCutoff::YearEnd,
            Cutoff::Anniversary => HorizonCutoff::Anniversary,
        }
    }
}

#[derive(Debug, clap::Args)]
struct PolicyArgs {
    /// Defaults to today.
    #[arg(long)]
    reference_date: Option<NaiveDate>,
    #[arg(long)]
    horizon_years: Option<u32>,
    /// 0 or 1 months subtracted from each contract duration.
    #[arg(long)]
    cycle_adjustment: Option<u32>,
    #[arg(long, value_enum)]
    cutoff: Option<Cutoff>,
}

impl PolicyArgs {
    fn apply(&self, config: &mut SyncConfig) -> Result<NaiveDate> {
        let policy = &mut config.settings.forecast;
        if let Some(years) = self.horizon_years {
            policy.horizon_years = years;
        }
        if let Some(adj) = self.cycle_adjustment {
            policy.cycle_adjustment_months = adj;
        }
        if let Some(cutoff) = self.cutoff {
            policy.cutoff = cutoff.into();
        }
        policy.validate()?;
        Ok(self.reference_date.unwrap_or_else(|| Local::now().date_naive()))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect announcements from the bid API into a timestamped CSV.
    Collect {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long, value_enum, default_value = "announced")]
        inquiry: Inquiry,
        #[arg(long)]
        max_items: Option<usize>,
        /// Look up award results for each collected bid.
        #[arg(long)]
        awards: bool,
    },
    /// Normalize CSV input, layer stored edits, and write the merged forecast CSV.
    Forecast {
        /// CSV file or directory of CSVs; defaults to the collected dir.
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        no_reports: bool,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Print one year of the merged dataset.
    Query {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month_from: Option<u32>,
        #[arg(long)]
        month_to: Option<u32>,
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Run the dashboard.
    Serve {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 8050)]
        port: u16,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Run the cron-scheduled collect + forecast until interrupted.
    Schedule,
    /// Index of the most recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = SyncConfig::load()?;

    match cli.command {
        Commands::Collect {
            start,
            end,
            keyword,
            inquiry,
            max_items,
            awards,
        } => {
            let mut search = SearchConfig::new(start, end).with_inquiry(inquiry.into());
            if let Some(keyword) = keyword {
                search = search.with_keyword(keyword);
            }
            if let Some(max_items) = max_items {
                config.settings.collection.max_items = max_items;
            }
            config.settings.collection.fetch_awards |= awards;
            let source = build_source(&config)?;
            let summary = run_collect(&config, source, search).await?;
            println!(
                "collect complete: run_id={} collected={} malformed={} output={}",
                summary.run_id,
                summary.collected,
                summary.malformed_rows,
                summary.output.display()
            );
        }
        Commands::Forecast {
            input,
            output,
            no_reports,
            policy,
        } => {
            let reference_date = policy.apply(&mut config)?;
            let request = ForecastRequest {
                input: input.unwrap_or_else(|| config.collected_dir()),
                output: output.unwrap_or_else(|| config.data_dir.join("forecast.csv")),
                policy: config.settings.forecast,
                reference_date,
                reports_dir: (!no_reports).then(|| config.reports_dir()),
            };
            let edits = bidcast_web::edit_store(&config).await;
            let summary = ForecastPipeline::new(edits).run_once(&request).await?;
            println!(
                "forecast complete: run_id={} observed={} forecasts={} skipped={} output={}",
                summary.run_id,
                summary.observed,
                summary.forecasts,
                summary.skipped.len(),
                summary.output.display()
            );
        }
        Commands::Query {
            input,
            year,
            month_from,
            month_to,
            org,
            json,
            policy,
        } => {
            let reference_date = policy.apply(&mut config)?;
            let input = input.unwrap_or_else(|| config.collected_dir());
            let edits = bidcast_web::edit_store(&config).await;
            let (dataset, _) = bidcast_sync::load_dataset(
                &input,
                edits.as_ref(),
                config.settings.forecast,
                reference_date,
            )
            .await?;
            let range = match (month_from, month_to) {
                (None, None) => None,
                (from, to) => Some((from.unwrap_or(1), to.unwrap_or(12))),
            };
            let view = query(dataset.records(), year, range, org.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else if view.is_empty() {
                println!("no data for {year}");
            } else {
                for row in &view.records {
                    let r = &row.record;
                    println!(
                        "{}\t{}\t{}\t{}",
                        r.announced_date,
                        r.organization,
                        r.title,
                        if r.is_forecast { "forecast" } else { "observed" }
                    );
                }
                println!(
                    "{} rows ({} forecast{})",
                    view.len(),
                    view.forecast_count(),
                    if view.only_forecasts { ", predictions only" } else { "" }
                );
            }
        }
        Commands::Serve {
            input,
            port,
            policy,
        } => {
            let reference_date = policy.apply(&mut config)?;
            let input = input.unwrap_or_else(|| config.collected_dir());
            let state = bidcast_web::build_state(&config, &input, reference_date).await?;
            bidcast_web::serve(state, port).await?;
        }
        Commands::Schedule => {
            config.scheduler_enabled = true;
            let source = build_source(&config)?;
            let config = Arc::new(config);
            let mut sched = maybe_build_scheduler(Arc::clone(&config), source)
                .await?
                .context("scheduler was not built")?;
            sched.start().await.context("starting scheduler")?;
            info!(cron_1 = %config.sync_cron_1, cron_2 = %config.sync_cron_2, "scheduler running");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { runs } => {
            println!("{}", reports::recent_runs_markdown(&config.reports_dir(), runs)?);
        }
    }

    Ok(())
}
