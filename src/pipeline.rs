/// One request end to end: resolve → merge → convert → render.
///
/// Stages run strictly in order. Derived results are reused from the cache
/// only when they were built from exactly the raw pages just resolved and
/// the same threshold step count:
///
/// - the probability surface is recomputed when nothing matching is stored
///   under the request's `SurfaceKey`
/// - the figure is re-rendered when nothing matching is stored under the
///   request's `FigureKey`
///
/// `is_new` alone does not decide this: a request with an overlapping model
/// set may already have stored the changed page.

use thiserror::Error;
use tracing::{debug, info};

use crate::analysis::probability::convert_to_probabilities;
use crate::cache::{FigureKey, Provenance, SharedCache, SurfaceKey};
use crate::catalog::{Model, Variable};
use crate::model::{ConvertError, EnsembleSeries, ProbabilitySurface, ResolveError, TimeWindow};
use crate::render::{Figure, RenderError, Renderer};
use crate::resolver::{resolve, EnsembleSource, Resolved};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Upstream had nothing usable for this request.
    #[error("no data: {0}")]
    NoData(ResolveError),
    #[error(transparent)]
    Resolve(ResolveError),
    #[error("probability conversion failed: {0}")]
    Convert(#[from] ConvertError),
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),
}

impl From<ResolveError> for PipelineError {
    fn from(e: ResolveError) -> Self {
        if e.is_no_data() {
            PipelineError::NoData(e)
        } else {
            PipelineError::Resolve(e)
        }
    }
}

impl PipelineError {
    /// True for conditions a caller should warn about and move past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::NoData(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub location: u64,
    pub variable: Variable,
    models: Vec<Model>,
    pub window: Option<TimeWindow>,
    pub plot_mean: bool,
}

impl Request {
    /// Duplicate models are dropped; first-seen order is kept.
    pub fn new(
        location: u64,
        variable: Variable,
        models: &[Model],
        window: Option<TimeWindow>,
        plot_mean: bool,
    ) -> Self {
        let mut unique = Vec::with_capacity(models.len());
        for model in models {
            if !unique.contains(model) {
                unique.push(*model);
            }
        }
        Self {
            location,
            variable,
            models: unique,
            window,
            plot_mean,
        }
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn surface_key(&self) -> SurfaceKey {
        SurfaceKey::new(self.location, self.variable, &self.models)
    }

    pub fn figure_key(&self) -> FigureKey {
        FigureKey::new(self.surface_key(), self.window, self.plot_mean)
    }
}

#[derive(Debug, Clone)]
pub struct CaseOutcome {
    /// Raw data for at least one model was not in the cache.
    pub is_new: bool,
    /// Raw pages and step count the surface and figure derive from.
    pub provenance: Provenance,
    pub series: EnsembleSeries,
    pub surface: ProbabilitySurface,
    pub figure: Figure,
}

pub fn run_case<S, R>(
    source: &S,
    renderer: &R,
    cache: &SharedCache,
    request: &Request,
    threshold_steps: usize,
) -> Result<CaseOutcome, PipelineError>
where
    S: EnsembleSource + ?Sized,
    R: Renderer + ?Sized,
{
    let Resolved {
        is_new,
        sources,
        series,
    } = resolve(source, cache, request.location, request.variable, &request.models)?;
    let provenance = Provenance::new(&sources, threshold_steps);

    let surface_key = request.surface_key();
    let stored = cache.lock().surface(&surface_key, &provenance).cloned();
    let surface = match stored {
        Some(surface) => {
            debug!(location = request.location, variable = %request.variable, "probability cache hit");
            surface
        }
        None => {
            let surface = convert_to_probabilities(&series, request.variable, threshold_steps)?;
            cache.lock().insert_surface(surface_key, provenance.clone(), surface.clone());
            surface
        }
    };

    let figure_key = request.figure_key();
    let stored = cache.lock().figure(&figure_key, &provenance).cloned();
    let figure = match stored {
        Some(figure) => {
            debug!(location = request.location, variable = %request.variable, "figure cache hit");
            figure
        }
        None => {
            let figure = renderer.render(&series, &surface, request.window.as_ref(), request.plot_mean)?;
            cache.lock().insert_figure(figure_key, provenance.clone(), figure.clone());
            figure
        }
    };

    info!(
        location = request.location,
        variable = %request.variable,
        models = request.models.len(),
        is_new,
        "case complete"
    );
    Ok(CaseOutcome {
        is_new,
        provenance,
        series,
        surface,
        figure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::ingest::fixtures::*;
    use crate::model::{EnsembleSeries, FetchError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PageSource {
        page: Mutex<String>,
    }

    impl PageSource {
        fn new(page: &str) -> Self {
            Self {
                page: Mutex::new(page.to_string()),
            }
        }
    }

    impl EnsembleSource for PageSource {
        fn fetch(&self, _location: u64, _variable: Variable, _model: Model) -> Result<String, FetchError> {
            Ok(self.page.lock().clone())
        }
    }

    /// Counts render calls and returns a placeholder figure.
    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl Renderer for CountingRenderer {
        fn render(
            &self,
            series: &EnsembleSeries,
            _surface: &ProbabilitySurface,
            _window: Option<&TimeWindow>,
            plot_mean: bool,
        ) -> Result<Figure, RenderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Figure::new(format!("<svg n={} members={} mean={}/>", n, series.member_count(), plot_mean)))
        }
    }

    fn request(plot_mean: bool) -> Request {
        Request::new(2867714, Variable::Temperature, &[Model::Ecmwf], None, plot_mean)
    }

    #[test]
    fn test_request_dedups_models_keeping_order() {
        let r = Request::new(1, Variable::Snow, &[Model::Gfs, Model::IconD2, Model::Gfs], None, true);
        assert_eq!(r.models(), &[Model::Gfs, Model::IconD2]);
        assert_eq!(r.surface_key().models(), &[Model::IconD2, Model::Gfs]);
    }

    #[test]
    fn test_first_run_computes_everything() {
        let source = PageSource::new(fixture_ensemble_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        let outcome = run_case(&source, &renderer, &cache, &request(true), 10).unwrap();
        assert!(outcome.is_new);
        assert_eq!(outcome.surface.thresholds.len(), 10);
        assert_eq!(outcome.surface.times.len(), outcome.series.time_count());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);

        let cache = cache.lock();
        assert_eq!(cache.raw_len(), 1);
        assert_eq!(cache.surface_len(), 1);
        assert_eq!(cache.figure_len(), 1);
    }

    #[test]
    fn test_unchanged_page_reuses_surface_and_figure() {
        let source = PageSource::new(fixture_ensemble_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        let first = run_case(&source, &renderer, &cache, &request(true), 10).unwrap();
        let second = run_case(&source, &renderer, &cache, &request(true), 10).unwrap();
        assert!(!second.is_new);
        assert_eq!(first.surface, second.surface);
        assert_eq!(first.figure, second.figure);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1, "figure must come from the cache");
    }

    #[test]
    fn test_new_display_options_render_without_reconverting() {
        let source = PageSource::new(fixture_ensemble_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        run_case(&source, &renderer, &cache, &request(true), 10).unwrap();
        let outcome = run_case(&source, &renderer, &cache, &request(false), 10).unwrap();
        assert!(!outcome.is_new);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.lock().surface_len(), 1);
        assert_eq!(cache.lock().figure_len(), 2);
    }

    #[test]
    fn test_changed_page_recomputes() {
        let source = PageSource::new(fixture_ensemble_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        let first = run_case(&source, &renderer, &cache, &request(true), 10).unwrap();
        *source.page.lock() = fixture_ragged_members_page().to_string();
        let second = run_case(&source, &renderer, &cache, &request(true), 10).unwrap();

        assert!(second.is_new);
        assert_ne!(first.surface, second.surface);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.lock().surface_len(), 1, "surface entry is replaced, not duplicated");
    }

    #[test]
    fn test_missing_marker_is_recoverable() {
        let source = PageSource::new(fixture_page_without_marker());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        let err = run_case(&source, &renderer, &cache, &request(true), 10).unwrap_err();
        assert!(err.is_recoverable(), "expected recoverable error, got {:?}", err);
        assert!(matches!(err, PipelineError::NoData(_)));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_truncated_declaration_is_not_recoverable() {
        let source = PageSource::new(fixture_truncated_declaration_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        let err = run_case(&source, &renderer, &cache, &request(true), 10).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_zero_steps_is_convert_error() {
        let source = PageSource::new(fixture_ensemble_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        let err = run_case(&source, &renderer, &cache, &request(true), 0).unwrap_err();
        assert!(matches!(err, PipelineError::Convert(ConvertError::NoSteps)));
    }

    #[test]
    fn test_page_stored_by_overlapping_request_does_not_serve_old_surface() {
        let source = PageSource::new(fixture_ensemble_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();
        let single = request(true);
        let pair = Request::new(2867714, Variable::Temperature, &[Model::Ecmwf, Model::Gfs], None, true);

        let first = run_case(&source, &renderer, &cache, &single, 10).unwrap();

        // The changed page is first seen by the two-model request.
        *source.page.lock() = fixture_ragged_members_page().to_string();
        run_case(&source, &renderer, &cache, &pair, 10).unwrap();

        let again = run_case(&source, &renderer, &cache, &single, 10).unwrap();
        assert!(!again.is_new, "the page itself was already cached");
        let fresh = convert_to_probabilities(&again.series, Variable::Temperature, 10).unwrap();
        assert_eq!(again.surface, fresh, "surface must come from the current page");
        assert_ne!(again.surface, first.surface);
        assert_ne!(again.provenance, first.provenance);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3, "figure must be redrawn too");
    }

    #[test]
    fn test_changed_step_count_recomputes() {
        let source = PageSource::new(fixture_ensemble_page());
        let renderer = CountingRenderer::default();
        let cache = Cache::empty("unused.json").into_shared();

        run_case(&source, &renderer, &cache, &request(true), 10).unwrap();
        let outcome = run_case(&source, &renderer, &cache, &request(true), 20).unwrap();
        assert!(!outcome.is_new);
        assert_eq!(outcome.surface.thresholds.len(), 20);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.lock().surface_len(), 1);
    }
}
