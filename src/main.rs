//! wxprob - ensemble forecast probability heatmaps
//!
//! Fetches ensemble meteograms, converts them to exceedance probabilities
//! and renders SVG heatmaps. Parsed data, probability surfaces and figures
//! are kept in a cache file so unchanged forecasts are not recomputed.
//!
//! Usage:
//!   wxprob show --location 2867714 --variable temperature --models icon_d2,ecmwf
//!   wxprob show --location 2867714 --variable snow --from 2024-05-01T00:00:00Z --to 2024-05-03T00:00:00Z
//!   wxprob batch --workers 8
//!
//! Environment:
//!   WXPROB_CONFIG - configuration file (default: ./wxprob.toml)
//!   WXPROB_CACHE  - cache file, overrides [cache].path
//!   RUST_LOG      - log filter (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use wxprob_service::batch::run_batch;
use wxprob_service::cache::Cache;
use wxprob_service::catalog::{models_caption, parse_models, Model, Variable};
use wxprob_service::config::{load_config, load_default_config, AppConfig};
use wxprob_service::ingest::meteogram::MeteogramClient;
use wxprob_service::model::TimeWindow;
use wxprob_service::pipeline::{run_case, Request};
use wxprob_service::render::{save_figure, SvgRenderer};

#[derive(Parser, Debug)]
#[command(name = "wxprob")]
#[command(about = "Ensemble forecast exceedance-probability heatmaps")]
struct Args {
    /// Configuration file (default: $WXPROB_CONFIG or ./wxprob.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one location/variable for one or more models
    Show {
        /// Upstream location id
        #[arg(short, long)]
        location: u64,

        /// Variable name, e.g. temperature, wind_gusts
        #[arg(short, long)]
        variable: Variable,

        /// Comma-separated model names (default: icon_d2,ecmwf)
        #[arg(short, long)]
        models: Option<String>,

        /// Window start (RFC 3339)
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// Window end (RFC 3339)
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,

        /// Leave out the ensemble mean line
        #[arg(long)]
        no_mean: bool,

        /// Output file (default: <plots_dir>/<models>_<location>_<variable>.svg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render every configured location × variable × model
    Batch {
        /// Worker threads (overrides [batch].workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path),
        None => load_default_config(),
    }
    .context("failed to load configuration")?;

    println!("🌦  wxprob");
    println!("=========\n");

    match args.command {
        Command::Show {
            location,
            variable,
            models,
            from,
            to,
            no_mean,
            output,
        } => {
            let models = match models {
                Some(list) => parse_models(&list).context("invalid --models")?,
                None => Model::DEFAULT_SELECTION.to_vec(),
            };
            let window = from.zip(to).map(|(start, end)| TimeWindow::new(start, end));
            show(&config, location, variable, &models, window, !no_mean, output)
        }
        Command::Batch { workers } => batch(config, workers),
    }
}

fn show(
    config: &AppConfig,
    location: u64,
    variable: Variable,
    models: &[Model],
    window: Option<TimeWindow>,
    plot_mean: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let cache = Cache::load(&config.cache.path)
        .with_context(|| format!("failed to load cache {}", config.cache.path.display()))?
        .into_shared();
    let client = MeteogramClient::new(&config.fetch).context("failed to build HTTP client")?;
    let renderer = SvgRenderer::default();

    let request = Request::new(location, variable, models, window, plot_mean);
    println!(
        "📊 {} at {} ({})",
        variable.label(),
        location,
        models_caption(request.models())
    );

    let outcome = match run_case(&client, &renderer, &cache, &request, config.convert.threshold_steps) {
        Ok(outcome) => outcome,
        Err(e) if e.is_recoverable() => {
            warn!(location, %variable, "{}", e);
            println!("⚠️  No data available for this selection.");
            return Ok(());
        }
        Err(e) => return Err(e).context("request failed"),
    };

    let path = output.unwrap_or_else(|| {
        let stem: Vec<&str> = request.models().iter().map(|m| m.canonical_name()).collect();
        config.batch.plots_dir.join(format!(
            "{}_{}_{}.svg",
            stem.join("+"),
            location,
            variable.canonical_name()
        ))
    });
    save_figure(&outcome.figure, &path)?;

    println!(
        "   {} members, {} timestamps{}",
        outcome.series.member_count(),
        outcome.series.time_count(),
        if outcome.is_new { " (new data)" } else { " (cached)" }
    );
    println!("   ✓ Saved {}", path.display());

    let cache = cache.lock();
    cache.save().context("failed to save cache")?;
    println!("   ✓ Cache {}", cache.path().display());
    Ok(())
}

fn batch(mut config: AppConfig, workers: Option<usize>) -> Result<()> {
    if let Some(workers) = workers {
        config.batch.workers = workers.max(1);
    }
    let cache = Cache::load(&config.cache.path)
        .with_context(|| format!("failed to load cache {}", config.cache.path.display()))?
        .into_shared();
    let client = MeteogramClient::new(&config.fetch).context("failed to build HTTP client")?;

    println!(
        "📥 Batch: {} locations, {} workers",
        config.batch.locations.len(),
        config.batch.workers
    );
    for location in &config.batch.locations {
        println!("   {} ({})", location.name, location.id);
    }
    println!();

    let summary = run_batch(
        Arc::new(client),
        Arc::new(SvgRenderer::default()),
        cache,
        &config.batch,
        config.convert.threshold_steps,
    )?;

    println!("\n✓ Batch complete");
    println!("   Rendered: {}", summary.rendered);
    println!("   Skipped (no data): {}", summary.skipped);
    if summary.failed > 0 {
        println!("   ✗ Failed: {}", summary.failed);
    }
    Ok(())
}
