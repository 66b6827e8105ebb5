/// Persistent cache for raw ensembles, probability surfaces and figures.
///
/// ## Layout
///
/// Three independent mappings sharing one lifecycle:
/// - `raw_data`      — `RawDataKey` → `EnsembleSeries`
/// - `probabilities` — `SurfaceKey` → (`Provenance`, `ProbabilitySurface`)
/// - `figures`       — `FigureKey`  → (`Provenance`, `Figure`)
///
/// Derived entries are only returned when the caller's provenance (raw data
/// keys and threshold step count) matches the stored one.
///
/// ## Durability
///
/// The whole cache lives in one JSON file:
///
/// ```text
/// { "version": 2,
///   "raw_data":      [[key, series], ...],
///   "probabilities": [[key, [provenance, surface]], ...],
///   "figures":       [[key, [provenance, figure]], ...] }
/// ```
///
/// `load` starts empty when the file is absent, and also when it was written
/// by a different format version (everything in here can be re-derived).
/// `save` writes a temporary file next to the target and renames it into
/// place, so readers never see a half-written cache. Two processes saving
/// the same file still race: the last rename wins.
///
/// ## Staleness
///
/// A derived entry whose provenance differs from the caller's is treated as
/// absent and gets replaced on the next insert. Entries are never evicted.

pub mod keys;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{EnsembleSeries, ProbabilitySurface};
use crate::render::Figure;

pub use keys::{FigureKey, Provenance, RawDataKey, SurfaceKey};

/// On-disk format version. Bump when any persisted type changes shape.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Cache handle shared by resolver, pipeline and batch workers.
pub type SharedCache = Arc<Mutex<Cache>>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cache file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to replace cache file {path}: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

// ---------------------------------------------------------------------------
// On-disk representation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Deserialize)]
struct CacheFile {
    #[allow(dead_code)]
    version: u32,
    raw_data: Vec<(RawDataKey, EnsembleSeries)>,
    probabilities: Vec<(SurfaceKey, (Provenance, ProbabilitySurface))>,
    figures: Vec<(FigureKey, (Provenance, Figure))>,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    version: u32,
    raw_data: Vec<(&'a RawDataKey, &'a EnsembleSeries)>,
    probabilities: Vec<(&'a SurfaceKey, &'a (Provenance, ProbabilitySurface))>,
    figures: Vec<(&'a FigureKey, &'a (Provenance, Figure))>,
}

/// Entries sorted by key so identical caches serialize identically.
fn sorted<'a, K: Ord, V>(map: &'a HashMap<K, V>) -> Vec<(&'a K, &'a V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Cache {
    path: PathBuf,
    raw_data: HashMap<RawDataKey, EnsembleSeries>,
    probabilities: HashMap<SurfaceKey, (Provenance, ProbabilitySurface)>,
    figures: HashMap<FigureKey, (Provenance, Figure)>,
}

impl Cache {
    /// Empty cache that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Loads the cache stored at `path`, or an empty one if there is none.
    ///
    /// # Errors
    /// - `CacheError::Io` — the file exists but cannot be read.
    /// - `CacheError::Corrupt` — the file is not a cache of this version.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        if !path.exists() {
            info!(path = %path.display(), "no cache file, starting empty");
            return Ok(Self::empty(path));
        }

        let text = fs::read_to_string(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;

        let probe: VersionProbe = serde_json::from_str(&text).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;
        if probe.version != CACHE_FORMAT_VERSION {
            warn!(
                path = %path.display(),
                found = probe.version,
                expected = CACHE_FORMAT_VERSION,
                "cache written by another format version, starting empty"
            );
            return Ok(Self::empty(path));
        }

        let file: CacheFile = serde_json::from_str(&text).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let cache = Self {
            path,
            raw_data: file.raw_data.into_iter().collect(),
            probabilities: file.probabilities.into_iter().collect(),
            figures: file.figures.into_iter().collect(),
        };
        info!(
            path = %cache.path.display(),
            raw = cache.raw_data.len(),
            probabilities = cache.probabilities.len(),
            figures = cache.figures.len(),
            "loaded cache"
        );
        Ok(cache)
    }

    /// Atomically replaces the cache file with the in-memory state.
    pub fn save(&self) -> Result<(), CacheError> {
        let snapshot = CacheFileRef {
            version: CACHE_FORMAT_VERSION,
            raw_data: sorted(&self.raw_data),
            probabilities: sorted(&self.probabilities),
            figures: sorted(&self.figures),
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &snapshot)?;
            writer.flush().map_err(io_err)?;
        }
        tmp.persist(&self.path).map_err(|source| CacheError::Persist {
            path: self.path.clone(),
            source,
        })?;

        info!(
            path = %self.path.display(),
            raw = self.raw_data.len(),
            probabilities = self.probabilities.len(),
            figures = self.figures.len(),
            "saved cache"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    // --- raw data ------------------------------------------------------------

    pub fn raw(&self, key: &RawDataKey) -> Option<&EnsembleSeries> {
        self.raw_data.get(key)
    }

    pub fn insert_raw(&mut self, key: RawDataKey, series: EnsembleSeries) {
        self.raw_data.insert(key, series);
    }

    // --- probability surfaces -----------------------------------------------

    /// Stored surface for `key`, if it was built from `provenance`.
    pub fn surface(&self, key: &SurfaceKey, provenance: &Provenance) -> Option<&ProbabilitySurface> {
        match self.probabilities.get(key) {
            Some((stored, surface)) if stored == provenance => Some(surface),
            _ => None,
        }
    }

    pub fn insert_surface(&mut self, key: SurfaceKey, provenance: Provenance, surface: ProbabilitySurface) {
        self.probabilities.insert(key, (provenance, surface));
    }

    // --- figures -------------------------------------------------------------

    /// Stored figure for `key`, if it was drawn from `provenance`.
    pub fn figure(&self, key: &FigureKey, provenance: &Provenance) -> Option<&Figure> {
        match self.figures.get(key) {
            Some((stored, figure)) if stored == provenance => Some(figure),
            _ => None,
        }
    }

    pub fn insert_figure(&mut self, key: FigureKey, provenance: Provenance, figure: Figure) {
        self.figures.insert(key, (provenance, figure));
    }

    // --- sizes ---------------------------------------------------------------

    pub fn raw_len(&self) -> usize {
        self.raw_data.len()
    }

    pub fn surface_len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn figure_len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_data.is_empty() && self.probabilities.is_empty() && self.figures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
