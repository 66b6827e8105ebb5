/// Ensemble → exceedance probability conversion.
///
/// Turns N member trajectories into a surface giving, for each timestamp and
/// each threshold, the percentage of members whose value strictly exceeds
/// that threshold.
///
/// # Algorithm
///
/// 1. Drop the deterministic "Main" run; it is a single forecast, not spread.
/// 2. Threshold range: minimum observed value across the FULL ensemble up to
///    the 99th percentile of all observed values (linear interpolation,
///    missing values ignored). Trims outliers off the top only.
/// 3. `steps` thresholds evenly spaced over that range, both ends included.
/// 4. Per timestamp: `n` = members with a value; probability at threshold `s`
///    = members with value > `s` / `n` × 100. When `n` is zero the whole row
///    is `None`.

use tracing::debug;

use crate::catalog::Variable;
use crate::model::{ConvertError, EnsembleSeries, ProbabilitySurface};

/// Number of threshold steps used unless configured otherwise.
pub const DEFAULT_THRESHOLD_STEPS: usize = 100;

/// Upper quantile bounding the threshold range.
pub const UPPER_QUANTILE: f64 = 0.99;

/// Converts an ensemble into a probability surface labelled with the
/// variable's canonical name.
///
/// # Errors
/// - `ConvertError::NoSteps` — `steps` is zero.
/// - `ConvertError::NoObservations` — the series holds no values at all.
/// - `ConvertError::NoMembers` — only the deterministic run is present.
pub fn convert_to_probabilities(
    series: &EnsembleSeries,
    variable: Variable,
    steps: usize,
) -> Result<ProbabilitySurface, ConvertError> {
    if steps == 0 {
        return Err(ConvertError::NoSteps);
    }

    let (min, max) = threshold_range(series)?;
    let ensemble = series.without_main();
    if ensemble.member_count() == 0 {
        return Err(ConvertError::NoMembers);
    }

    let thresholds = linspace(min, max, steps);
    debug!(
        variable = variable.canonical_name(),
        members = ensemble.member_count(),
        times = ensemble.time_count(),
        min,
        max,
        "converting ensemble to probabilities"
    );

    Ok(exceedance_surface(&ensemble, &thresholds, variable.canonical_name()))
}

/// Lowest observed value and the upper quantile of all observed values.
///
/// Computed over the series as given, deterministic run included.
pub fn threshold_range(series: &EnsembleSeries) -> Result<(f64, f64), ConvertError> {
    let mut observed: Vec<f64> = series.observed_values().collect();
    if observed.is_empty() {
        return Err(ConvertError::NoObservations);
    }
    observed.sort_by(f64::total_cmp);

    let min = observed[0];
    let max = quantile_sorted(&observed, UPPER_QUANTILE);
    Ok((min, max))
}

/// Quantile of already-sorted data with linear interpolation between the
/// two nearest ranks.
///
/// `sorted` must be non-empty.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let pos = q.clamp(0.0, 1.0) * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// `count` evenly spaced values from `start` to `stop`, both included.
///
/// A single step yields `[start]`. Equal bounds yield `count` copies.
pub fn linspace(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let span = stop - start;
            let denom = (count - 1) as f64;
            (0..count)
                .map(|i| {
                    if i == count - 1 {
                        stop
                    } else {
                        start + span * i as f64 / denom
                    }
                })
                .collect()
        }
    }
}

/// Exceedance percentages of `ensemble` at each of `thresholds`.
///
/// Every member of `ensemble` is counted; callers remove the deterministic
/// run first.
pub fn exceedance_surface(
    ensemble: &EnsembleSeries,
    thresholds: &[f64],
    label: &str,
) -> ProbabilitySurface {
    let probabilities = (0..ensemble.time_count())
        .map(|t| {
            let values: Vec<f64> = ensemble.column(t).collect();
            if values.is_empty() {
                return vec![None; thresholds.len()];
            }
            let n = values.len() as f64;
            thresholds
                .iter()
                .map(|&s| {
                    let above = values.iter().filter(|&&v| v > s).count();
                    Some(above as f64 / n * 100.0)
                })
                .collect()
        })
        .collect();

    ProbabilitySurface {
        label: label.to_string(),
        times: ensemble.times().to_vec(),
        thresholds: thresholds.to_vec(),
        probabilities,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
