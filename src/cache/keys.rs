/// Cache key types.
///
/// - `RawDataKey`  — content hash of a fetched page plus its request fields
/// - `SurfaceKey`  — (location, variable, sorted model set)
/// - `FigureKey`   — surface key plus display window and mean toggle
///
/// `Provenance` is stored next to derived entries rather than used as a key:
/// it records which raw pages and step count a surface or figure came from,
/// so a lookup can tell a current entry from one built on older data.
///
/// Keys are plain values with derived equality, hashing and ordering, so a
/// key built twice from the same request is the same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::{Model, Variable};
use crate::model::TimeWindow;

/// Hex SHA-256 over a page body and the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawDataKey(String);

impl RawDataKey {
    pub fn from_content(content: &str, location: u64, variable: Variable, model: Model) -> Self {
        let location = location.to_string();
        let mut hasher = Sha256::new();
        for field in [
            content,
            location.as_str(),
            variable.upstream_id(),
            model.upstream_id(),
        ] {
            hasher.update(field.as_bytes());
            // Field separator so ("ab", "c") and ("a", "bc") differ.
            hasher.update([0u8]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceKey {
    pub location: u64,
    pub variable: Variable,
    models: Vec<Model>,
}

impl SurfaceKey {
    /// Model order and duplicates do not matter: the set is normalized.
    pub fn new(location: u64, variable: Variable, models: &[Model]) -> Self {
        let mut models = models.to_vec();
        models.sort();
        models.dedup();
        Self {
            location,
            variable,
            models,
        }
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FigureKey {
    pub surface: SurfaceKey,
    pub window: Option<TimeWindow>,
    pub plot_mean: bool,
}

impl FigureKey {
    pub fn new(surface: SurfaceKey, window: Option<TimeWindow>, plot_mean: bool) -> Self {
        Self {
            surface,
            window,
            plot_mean,
        }
    }
}

/// Inputs a derived entry was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    sources: Vec<RawDataKey>,
    threshold_steps: usize,
}

impl Provenance {
    /// Sources are sorted so model order in the request does not matter.
    pub fn new(sources: &[RawDataKey], threshold_steps: usize) -> Self {
        let mut sources = sources.to_vec();
        sources.sort();
        sources.dedup();
        Self {
            sources,
            threshold_steps,
        }
    }

    pub fn sources(&self) -> &[RawDataKey] {
        &self.sources
    }

    pub fn threshold_steps(&self) -> usize {
        self.threshold_steps
    }
}
