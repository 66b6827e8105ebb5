/// Offline batch rendering over configured locations × variables × models.
///
/// Every case is a single-model request with no window and the mean line
/// on. Cases run on a fixed-size thread pool sharing one cache handle; the
/// cache is written once after all cases finish.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use thiserror::Error;
use threadpool::ThreadPool;
use tracing::{error, info, warn};

use crate::cache::{CacheError, SharedCache};
use crate::catalog::{CatalogError, Model, Variable};
use crate::config::BatchConfig;
use crate::pipeline::{run_case, PipelineError, Request};
use crate::render::{save_figure, Renderer};
use crate::resolver::EnsembleSource;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to save cache: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCase {
    pub location: u64,
    pub variable: Variable,
    pub model: Model,
}

impl BatchCase {
    /// `{model}_{location}_{variable}.svg`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.svg",
            self.model.canonical_name(),
            self.location,
            self.variable.canonical_name()
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub rendered: usize,
    /// Cases with no upstream data.
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.rendered + self.skipped + self.failed
    }
}

/// Every combination, ordered location-major.
pub fn cases(locations: &[u64], variables: &[Variable], models: &[Model]) -> Vec<BatchCase> {
    locations
        .iter()
        .flat_map(|&location| {
            variables.iter().flat_map(move |&variable| {
                models.iter().map(move |&model| BatchCase {
                    location,
                    variable,
                    model,
                })
            })
        })
        .collect()
}

enum CaseResult {
    Rendered(PathBuf),
    Skipped(PipelineError),
    Failed(String),
}

fn run_one(
    source: &dyn EnsembleSource,
    renderer: &dyn Renderer,
    cache: &SharedCache,
    case: BatchCase,
    plots_dir: &Path,
    threshold_steps: usize,
) -> CaseResult {
    let request = Request::new(case.location, case.variable, &[case.model], None, true);
    let outcome = match run_case(source, renderer, cache, &request, threshold_steps) {
        Ok(outcome) => outcome,
        Err(e) if e.is_recoverable() => return CaseResult::Skipped(e),
        Err(e) => return CaseResult::Failed(e.to_string()),
    };
    let path = plots_dir.join(case.file_name());
    match save_figure(&outcome.figure, &path) {
        Ok(()) => CaseResult::Rendered(path),
        Err(e) => CaseResult::Failed(e.to_string()),
    }
}

pub fn run_batch(
    source: Arc<dyn EnsembleSource>,
    renderer: Arc<dyn Renderer>,
    cache: SharedCache,
    config: &BatchConfig,
    threshold_steps: usize,
) -> Result<BatchSummary, BatchError> {
    let locations: Vec<u64> = config.locations.iter().map(|l| l.id).collect();
    let variables = config.variables()?;
    let models = config.models()?;
    let all = cases(&locations, &variables, &models);

    info!(
        cases = all.len(),
        workers = config.workers,
        plots_dir = %config.plots_dir.display(),
        "starting batch"
    );

    let pool = ThreadPool::new(config.workers.max(1));
    let (tx, rx) = mpsc::channel();
    for case in all {
        let tx = tx.clone();
        let source = Arc::clone(&source);
        let renderer = Arc::clone(&renderer);
        let cache = Arc::clone(&cache);
        let plots_dir = config.plots_dir.clone();
        pool.execute(move || {
            let result = run_one(
                source.as_ref(),
                renderer.as_ref(),
                &cache,
                case,
                &plots_dir,
                threshold_steps,
            );
            // Receiver outlives the pool; a send error means the batch was abandoned.
            let _ = tx.send((case, result));
        });
    }
    drop(tx);

    let mut summary = BatchSummary::default();
    for (case, result) in rx {
        match result {
            CaseResult::Rendered(path) => {
                summary.rendered += 1;
                info!(path = %path.display(), "saved figure");
            }
            CaseResult::Skipped(e) => {
                summary.skipped += 1;
                warn!(
                    location = case.location,
                    variable = %case.variable,
                    model = %case.model,
                    "skipping case: {}",
                    e
                );
            }
            CaseResult::Failed(msg) => {
                summary.failed += 1;
                error!(
                    location = case.location,
                    variable = %case.variable,
                    model = %case.model,
                    "case failed: {}",
                    msg
                );
            }
        }
    }
    pool.join();

    cache.lock().save()?;
    info!(
        rendered = summary.rendered,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch complete"
    );
    Ok(summary)
}
