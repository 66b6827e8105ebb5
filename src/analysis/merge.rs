/// Multi-model ensemble merging.
///
/// Several models' ensembles for the same location and variable are stacked
/// into one larger ensemble before conversion:
///
/// 1. Members from every model are concatenated. The time axis becomes the
///    sorted union of all models' timestamps; a member has no value at a
///    time its model does not forecast.
/// 2. Members are renumbered `0..n`. Upstream names (including "Main") are
///    dropped so names cannot collide across models.
/// 3. Gaps inside each member's trajectory are filled by linear
///    interpolation in time. Leading and trailing gaps stay missing.
///
/// A single-model request never goes through here; its series is used as
/// fetched, member names intact.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::model::{EnsembleSeries, MemberId, ShapeError};

/// Series for one model plus whether it was freshly fetched.
pub type ResolvedSeries = (bool, EnsembleSeries);

/// Merges per-model series into one ensemble.
///
/// The returned flag is true if any input was freshly fetched.
pub fn merge_models(parts: Vec<ResolvedSeries>) -> Result<ResolvedSeries, ShapeError> {
    let is_new = parts.iter().any(|(fresh, _)| *fresh);
    let series: Vec<EnsembleSeries> = parts.into_iter().map(|(_, s)| s).collect();
    Ok((is_new, concat_members(&series)?))
}

/// Stacks members of all inputs over the union of their time axes, then
/// renumbers and interpolates.
pub fn concat_members(parts: &[EnsembleSeries]) -> Result<EnsembleSeries, ShapeError> {
    let times: Vec<DateTime<Utc>> = parts
        .iter()
        .flat_map(|s| s.times().iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut values = Vec::new();
    for part in parts {
        // Position of each of this part's timestamps on the merged axis.
        let slots: Vec<usize> = part
            .times()
            .iter()
            .map(|t| times.binary_search(t).unwrap_or_else(|idx| idx))
            .collect();

        for row in part.rows() {
            let mut merged = vec![None; times.len()];
            for (value, &slot) in row.iter().zip(&slots) {
                merged[slot] = *value;
            }
            values.push(interpolate_gaps(&times, &merged));
        }
    }

    let members = (0..values.len()).map(MemberId::Index).collect();
    EnsembleSeries::new(members, times, values)
}

/// Fills interior gaps of one member by linear interpolation over time.
///
/// Values before the first or after the last observation are left missing.
pub fn interpolate_gaps(times: &[DateTime<Utc>], row: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out: Vec<Option<f64>> = row.iter().map(|v| v.filter(|x| !x.is_nan())).collect();

    let mut prev: Option<usize> = None;
    for idx in 0..out.len() {
        if out[idx].is_none() {
            continue;
        }
        if let Some(start) = prev {
            if idx - start > 1 {
                fill_between(times, &mut out, start, idx);
            }
        }
        prev = Some(idx);
    }
    out
}

fn fill_between(times: &[DateTime<Utc>], out: &mut [Option<f64>], lo: usize, hi: usize) {
    let (Some(v0), Some(v1)) = (out[lo], out[hi]) else {
        return;
    };
    let t0 = times[lo].timestamp_millis() as f64;
    let span = times[hi].timestamp_millis() as f64 - t0;
    for idx in lo + 1..hi {
        let frac = if span > 0.0 {
            (times[idx].timestamp_millis() as f64 - t0) / span
        } else {
            0.0
        };
        out[idx] = Some(v0 + (v1 - v0) * frac);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
