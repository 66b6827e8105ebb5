/// Raw data resolution: fetch → hash → cache hit or parse-and-store.
///
/// The page is fetched on every call; the cache only saves re-parsing and
/// tells downstream stages whether anything changed. `is_new` is true
/// exactly when some page (for this request) has not been seen before.
/// `sources` names the raw entries the series was built from, which is what
/// derived cache entries are checked against.

use tracing::debug;

use crate::analysis::merge::merge_models;
use crate::cache::{RawDataKey, SharedCache};
use crate::catalog::{Model, Variable};
use crate::ingest::meteogram::parse_page;
use crate::model::{EnsembleSeries, FetchError, ResolveError};

/// Anything that can produce the raw page for a request.
///
/// Implementations distinguish "no data" pages from transport failures
/// and do not retry.
pub trait EnsembleSource: Send + Sync {
    fn fetch(&self, location: u64, variable: Variable, model: Model) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub is_new: bool,
    /// One raw-data key per model, in request order.
    pub sources: Vec<RawDataKey>,
    pub series: EnsembleSeries,
}

/// Resolves one model's ensemble.
///
/// The cache lock is held only for the lookup and the insert, never across
/// the fetch or the parse.
pub fn resolve_model<S: EnsembleSource + ?Sized>(
    source: &S,
    cache: &SharedCache,
    location: u64,
    variable: Variable,
    model: Model,
) -> Result<Resolved, ResolveError> {
    let page = source.fetch(location, variable, model)?;
    let key = RawDataKey::from_content(&page, location, variable, model);

    let cached = cache.lock().raw(&key).cloned();
    if let Some(series) = cached {
        debug!(location, %variable, %model, key = key.as_str(), "raw data cache hit");
        return Ok(Resolved {
            is_new: false,
            sources: vec![key],
            series,
        });
    }

    let series = parse_page(&page)?;
    debug!(
        location,
        %variable,
        %model,
        members = series.member_count(),
        "raw data cache miss, stored parsed series"
    );
    cache.lock().insert_raw(key.clone(), series.clone());
    Ok(Resolved {
        is_new: true,
        sources: vec![key],
        series,
    })
}

/// Resolves the ensemble for a request over one or more models.
///
/// A single model is returned exactly as resolved. Several models are
/// resolved one after another and merged; any model failing fails the
/// request.
pub fn resolve<S: EnsembleSource + ?Sized>(
    source: &S,
    cache: &SharedCache,
    location: u64,
    variable: Variable,
    models: &[Model],
) -> Result<Resolved, ResolveError> {
    match models {
        [] => Err(ResolveError::NoModels),
        [model] => resolve_model(source, cache, location, variable, *model),
        many => {
            let parts = many
                .iter()
                .map(|&model| resolve_model(source, cache, location, variable, model))
                .collect::<Result<Vec<_>, _>>()?;
            let sources = parts.iter().flat_map(|p| p.sources.iter().cloned()).collect();
            let (is_new, series) = merge_models(parts.into_iter().map(|p| (p.is_new, p.series)).collect())?;
            Ok(Resolved {
                is_new,
                sources,
                series,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::ingest::fixtures::*;
    use crate::model::MemberId;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned pages per model; missing models fail like a dropped
    /// connection.
    struct FakeSource {
        pages: Mutex<HashMap<Model, String>>,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(pages: &[(Model, &str)]) -> Self {
            Self {
                pages: Mutex::new(pages.iter().map(|(m, p)| (*m, p.to_string())).collect()),
                fetches: AtomicUsize::new(0),
            }
        }

        fn replace(&self, model: Model, page: &str) {
            self.pages.lock().insert(model, page.to_string());
        }
    }

    impl EnsembleSource for FakeSource {
        fn fetch(&self, _location: u64, _variable: Variable, model: Model) -> Result<String, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .get(&model)
                .cloned()
                .ok_or_else(|| FetchError::Transport("connection reset".to_string()))
        }
    }

    fn cache() -> SharedCache {
        Cache::empty("unused.json").into_shared()
    }

    #[test]
    fn test_first_resolution_is_new_then_cached() {
        let source = FakeSource::new(&[(Model::Ecmwf, fixture_ensemble_page())]);
        let cache = cache();

        let first = resolve_model(&source, &cache, 1, Variable::Temperature, Model::Ecmwf).unwrap();
        assert!(first.is_new);
        assert_eq!(cache.lock().raw_len(), 1);

        let second = resolve_model(&source, &cache, 1, Variable::Temperature, Model::Ecmwf).unwrap();
        assert!(!second.is_new, "identical page must be a cache hit");
        assert_eq!(first.series, second.series);
        assert_eq!(first.sources, second.sources);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2, "the page is fetched every time");
        assert_eq!(cache.lock().raw_len(), 1);
    }

    #[test]
    fn test_changed_page_is_new() {
        let source = FakeSource::new(&[(Model::Ecmwf, fixture_ensemble_page())]);
        let cache = cache();
        let before = resolve_model(&source, &cache, 1, Variable::Temperature, Model::Ecmwf).unwrap();

        source.replace(Model::Ecmwf, fixture_ragged_members_page());
        let after = resolve_model(&source, &cache, 1, Variable::Temperature, Model::Ecmwf).unwrap();
        assert!(after.is_new);
        assert_eq!(after.series.member_count(), 3);
        assert_ne!(before.sources, after.sources);
        assert_eq!(cache.lock().raw_len(), 2);
    }

    #[test]
    fn test_same_page_other_location_is_new() {
        let source = FakeSource::new(&[(Model::Ecmwf, fixture_ensemble_page())]);
        let cache = cache();
        resolve_model(&source, &cache, 1, Variable::Temperature, Model::Ecmwf).unwrap();
        let other = resolve_model(&source, &cache, 2, Variable::Temperature, Model::Ecmwf).unwrap();
        assert!(other.is_new);
    }

    #[test]
    fn test_missing_marker_surfaces_no_data() {
        let source = FakeSource::new(&[(Model::Ecmwf, fixture_page_without_marker())]);
        let cache = cache();
        let err = resolve_model(&source, &cache, 1, Variable::Temperature, Model::Ecmwf)
            .expect_err("page without declaration must fail");
        assert!(err.is_no_data(), "expected no-data condition, got {:?}", err);
        assert!(cache.lock().is_empty(), "nothing is cached for a no-data page");
    }

    #[test]
    fn test_transport_failure_is_not_no_data() {
        let source = FakeSource::new(&[]);
        let err = resolve_model(&source, &cache(), 1, Variable::Temperature, Model::Gfs).unwrap_err();
        assert!(!err.is_no_data());
        assert!(matches!(err, ResolveError::Fetch(FetchError::Transport(_))));
    }

    #[test]
    fn test_no_models_is_error() {
        let source = FakeSource::new(&[]);
        let result = resolve(&source, &cache(), 1, Variable::Temperature, &[]);
        assert!(matches!(result, Err(ResolveError::NoModels)));
    }

    #[test]
    fn test_single_model_bypasses_merge() {
        let source = FakeSource::new(&[(Model::Ecmwf, fixture_ensemble_page())]);
        let cache = cache();
        let direct = resolve_model(&source, &cache, 1, Variable::Temperature, Model::Ecmwf).unwrap();
        let via_resolve = resolve(&source, &cache, 1, Variable::Temperature, &[Model::Ecmwf]).unwrap();
        assert_eq!(direct.series, via_resolve.series);
        assert_eq!(direct.sources, via_resolve.sources);
        assert!(via_resolve.series.has_main(), "member names survive the bypass");
    }

    #[test]
    fn test_multi_model_merges_and_renumbers() {
        let source = FakeSource::new(&[
            (Model::IconD2, fixture_ensemble_page()),
            (Model::Ecmwf, fixture_ragged_members_page()),
        ]);
        let cache = cache();
        let merged =
            resolve(&source, &cache, 1, Variable::Temperature, &[Model::IconD2, Model::Ecmwf]).unwrap();
        assert!(merged.is_new);
        assert_eq!(merged.sources.len(), 2);
        assert_eq!(merged.series.member_count(), 7);
        assert_eq!(merged.series.members()[6], MemberId::Index(6));
        assert!(!merged.series.has_main());
    }

    #[test]
    fn test_multi_model_is_new_if_any_model_changed() {
        let source = FakeSource::new(&[
            (Model::IconD2, fixture_ensemble_page()),
            (Model::Ecmwf, fixture_ragged_members_page()),
        ]);
        let cache = cache();
        let models = [Model::IconD2, Model::Ecmwf];
        resolve(&source, &cache, 1, Variable::Temperature, &models).unwrap();

        let again = resolve(&source, &cache, 1, Variable::Temperature, &models).unwrap();
        assert!(!again.is_new);

        source.replace(Model::Ecmwf, fixture_ensemble_page());
        let changed = resolve(&source, &cache, 1, Variable::Temperature, &models).unwrap();
        assert!(changed.is_new);
        assert_eq!(changed.sources[0], again.sources[0], "unchanged model keeps its key");
        assert_ne!(changed.sources[1], again.sources[1]);
    }

    #[test]
    fn test_multi_model_fails_if_any_model_has_no_data() {
        let source = FakeSource::new(&[
            (Model::IconD2, fixture_ensemble_page()),
            (Model::Ecmwf, fixture_page_without_script()),
        ]);
        let err = resolve(&source, &cache(), 1, Variable::Temperature, &[Model::IconD2, Model::Ecmwf])
            .unwrap_err();
        assert!(err.is_no_data());
    }
}
