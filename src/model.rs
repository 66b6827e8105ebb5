/// Core data types for the ensemble probability service.
///
/// This module defines the shared domain model imported by all other modules:
/// ensemble member identifiers, the raw ensemble grid, the derived
/// probability surface, time windows, and the error enums for each layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Upstream name of the deterministic run shipped alongside the ensemble.
pub const MAIN_MEMBER: &str = "Main";

// ---------------------------------------------------------------------------
// Member identifiers
// ---------------------------------------------------------------------------

/// Identifier of one ensemble member.
///
/// Single-model series keep the names reported upstream ("Main", "1", ...).
/// Merged series are renumbered `0..n`, which drops model provenance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberId {
    Named(String),
    Index(usize),
}

impl MemberId {
    /// True for the deterministic "Main" run.
    pub fn is_main(&self) -> bool {
        matches!(self, MemberId::Named(name) if name == MAIN_MEMBER)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberId::Named(name) => write!(f, "{}", name),
            MemberId::Index(idx) => write!(f, "{}", idx),
        }
    }
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

/// Inclusive time range used to crop series and surfaces for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Builds a window, swapping the bounds if they were given in reverse.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t <= self.end
    }
}

// ---------------------------------------------------------------------------
// Ensemble series
// ---------------------------------------------------------------------------

/// Raw ensemble forecast: one row per member, one column per timestamp.
///
/// Missing measurements are `None`. Instances are immutable once built;
/// every transformation returns a new series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSeries {
    members: Vec<MemberId>,
    times: Vec<DateTime<Utc>>,
    values: Vec<Vec<Option<f64>>>,
}

impl EnsembleSeries {
    /// Builds a series, checking that `values` is `members × times`.
    pub fn new(
        members: Vec<MemberId>,
        times: Vec<DateTime<Utc>>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, ShapeError> {
        if values.len() != members.len() {
            return Err(ShapeError {
                expected: (members.len(), times.len()),
                row: None,
                found: values.len(),
            });
        }
        for (idx, row) in values.iter().enumerate() {
            if row.len() != times.len() {
                return Err(ShapeError {
                    expected: (members.len(), times.len()),
                    row: Some(idx),
                    found: row.len(),
                });
            }
        }
        Ok(Self { members, times, values })
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    /// Per-member rows, aligned with `members()`.
    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.values
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn time_count(&self) -> usize {
        self.times.len()
    }

    pub fn value(&self, member: usize, time: usize) -> Option<f64> {
        self.values.get(member)?.get(time).copied().flatten()
    }

    /// Row for a given member identifier.
    pub fn member(&self, id: &MemberId) -> Option<&[Option<f64>]> {
        self.members
            .iter()
            .position(|m| m == id)
            .map(|idx| self.values[idx].as_slice())
    }

    pub fn has_main(&self) -> bool {
        self.members.iter().any(MemberId::is_main)
    }

    /// The deterministic run, if the upstream shipped one.
    pub fn main_member(&self) -> Option<&[Option<f64>]> {
        self.member(&MemberId::Named(MAIN_MEMBER.to_string()))
    }

    /// Copy of the series with the "Main" member removed.
    ///
    /// Returns an identical series when there is no "Main" member.
    pub fn without_main(&self) -> Self {
        let (members, values) = self
            .members
            .iter()
            .zip(&self.values)
            .filter(|(m, _)| !m.is_main())
            .map(|(m, row)| (m.clone(), row.clone()))
            .unzip();
        Self {
            members,
            times: self.times.clone(),
            values,
        }
    }

    /// All non-missing measurements, across every member and timestamp.
    pub fn observed_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values
            .iter()
            .flat_map(|row| row.iter().filter_map(|v| *v))
            .filter(|v| !v.is_nan())
    }

    /// Non-missing member values at one timestamp.
    pub fn column(&self, time: usize) -> impl Iterator<Item = f64> + '_ {
        self.values
            .iter()
            .filter_map(move |row| row.get(time).copied().flatten())
            .filter(|v| !v.is_nan())
    }

    /// Mean across all members (deterministic run included) per timestamp.
    ///
    /// `None` where no member has a value.
    pub fn mean_by_time(&self) -> Vec<Option<f64>> {
        (0..self.times.len())
            .map(|t| {
                let (sum, count) = self
                    .column(t)
                    .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                if count == 0 { None } else { Some(sum / count as f64) }
            })
            .collect()
    }

    /// Crops the series to the timestamps inside `window`.
    pub fn slice(&self, window: &TimeWindow) -> Self {
        let keep: Vec<usize> = self
            .times
            .iter()
            .enumerate()
            .filter(|(_, t)| window.contains(t))
            .map(|(idx, _)| idx)
            .collect();
        Self {
            members: self.members.clone(),
            times: keep.iter().map(|&idx| self.times[idx]).collect(),
            values: self
                .values
                .iter()
                .map(|row| keep.iter().map(|&idx| row[idx]).collect())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Probability surface
// ---------------------------------------------------------------------------

/// Exceedance probabilities (percent) indexed by timestamp and threshold.
///
/// `probabilities[t][s]` is the share of ensemble members whose value at
/// `times[t]` is strictly greater than `thresholds[s]`. A `None` entry marks
/// a timestamp at which no member had a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilitySurface {
    /// Canonical variable name the thresholds are expressed in.
    pub label: String,
    pub times: Vec<DateTime<Utc>>,
    pub thresholds: Vec<f64>,
    pub probabilities: Vec<Vec<Option<f64>>>,
}

impl ProbabilitySurface {
    pub fn get(&self, time: usize, step: usize) -> Option<f64> {
        self.probabilities.get(time)?.get(step).copied().flatten()
    }

    /// Crops the surface to the timestamps inside `window`.
    pub fn slice(&self, window: &TimeWindow) -> Self {
        let (times, probabilities) = self
            .times
            .iter()
            .zip(&self.probabilities)
            .filter(|(t, _)| window.contains(t))
            .map(|(t, row)| (*t, row.clone()))
            .unzip();
        Self {
            label: self.label.clone(),
            times,
            thresholds: self.thresholds.clone(),
            probabilities,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Series grid did not match its axes.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("series shape mismatch: expected {expected:?}, row {row:?} has {found} entries")]
pub struct ShapeError {
    pub expected: (usize, usize),
    pub row: Option<usize>,
    pub found: usize,
}

/// Errors that can arise when fetching or parsing an ensemble page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The page came back without the ensemble data declaration. Recoverable:
    /// callers warn or skip and keep going.
    #[error("no usable data: {0}")]
    NoData(String),
    /// Non-2xx HTTP response from the upstream site.
    #[error("HTTP error: {0}")]
    Http(u16),
    /// Connection, TLS or timeout failure. Not retried.
    #[error("transport error: {0}")]
    Transport(String),
    /// The data declaration was found but could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_no_data(&self) -> bool {
        matches!(self, FetchError::NoData(_))
    }
}

/// Errors from the probability conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("ensemble has no members besides the deterministic run")]
    NoMembers,
    #[error("ensemble contains no observed values")]
    NoObservations,
    #[error("threshold step count must be at least 1")]
    NoSteps,
}

/// Errors from resolving raw data for a request.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("request names no models")]
    NoModels,
    #[error("merged series is malformed: {0}")]
    Shape(#[from] ShapeError),
}

impl ResolveError {
    pub fn is_no_data(&self) -> bool {
        matches!(self, ResolveError::Fetch(e) if e.is_no_data())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
