/// Ensemble analysis for the probability service.
///
/// Submodules:
/// - `probability` — converts an ensemble into an exceedance-probability surface.
/// - `merge`       — stacks several models' ensembles into one before conversion.

pub mod merge;
pub mod probability;
