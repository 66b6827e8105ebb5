/// Probability heatmap rendering.
///
/// Figures are SVG documents held as strings, so they can live in the cache
/// next to the data they were drawn from and be written out unchanged.
///
/// A figure shows:
/// - the probability surface as filled cells, banded into ten 10% levels
/// - the ensemble mean (optional) and the deterministic run as dashed lines
/// - a dotted marker at the current time, unless the window starts in the future
///
/// The x axis counts hours from midnight (UTC) of the first timestamp.

use chrono::{DateTime, Utc};
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::model::{EnsembleSeries, ProbabilitySurface, TimeWindow};

/// Probability band edges: 0, 10, ..., 100.
pub const PROBABILITY_LEVELS: usize = 11;

const LIGHTEST: (u8, u8, u8) = (247, 251, 255);
const DARKEST: (u8, u8, u8) = (8, 48, 107);
const NOW_MARKER: RGBColor = RGBColor(128, 128, 128);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nothing to draw: the surface has no timestamps or thresholds in range")]
    Empty,
    #[error("drawing failed: {0}")]
    Draw(String),
    #[error("failed to write figure to {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A rendered figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    svg: String,
}

impl Figure {
    pub fn new(svg: String) -> Self {
        Self { svg }
    }

    pub fn svg(&self) -> &str {
        &self.svg
    }
}

/// Draws an ensemble and its probability surface.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        series: &EnsembleSeries,
        surface: &ProbabilitySurface,
        window: Option<&TimeWindow>,
        plot_mean: bool,
    ) -> Result<Figure, RenderError>;
}

/// Writes a figure to disk, creating parent directories as needed.
pub fn save_figure(figure: &Figure, path: &Path) -> Result<(), RenderError> {
    let io_err = |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, figure.svg()).map_err(io_err)
}

/// Axis label for an hour offset: `"5h"`, `"+1d 3h"`.
pub fn tick_to_label(hours_since_start: i64) -> String {
    let days = hours_since_start.div_euclid(24);
    let hours = hours_since_start.rem_euclid(24);
    if days != 0 {
        format!("+{}d {}h", days, hours)
    } else {
        format!("{}h", hours)
    }
}

/// Hours between midnight (UTC) of `reference`'s day and `time`.
pub fn hours_since_midnight(reference: DateTime<Utc>, time: DateTime<Utc>) -> f64 {
    let midnight = reference
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(reference);
    (time - midnight).num_seconds() as f64 / 3600.0
}

/// Fill colour for a probability, banded by `PROBABILITY_LEVELS`.
pub fn level_color(probability: f64) -> RGBColor {
    let bands = (PROBABILITY_LEVELS - 1) as f64;
    let band = (probability / 100.0 * bands).floor().clamp(0.0, bands - 1.0);
    let t = band / (bands - 1.0);
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(
        mix(LIGHTEST.0, DARKEST.0),
        mix(LIGHTEST.1, DARKEST.1),
        mix(LIGHTEST.2, DARKEST.2),
    )
}

/// Cell edges around each centre: halfway to the neighbours, with the outer
/// cells extended symmetrically.
fn cell_edges(centres: &[f64]) -> Vec<(f64, f64)> {
    let n = centres.len();
    (0..n)
        .map(|i| {
            let lo = if i > 0 {
                (centres[i - 1] + centres[i]) / 2.0
            } else if n > 1 {
                centres[0] - (centres[1] - centres[0]) / 2.0
            } else {
                centres[0] - 0.5
            };
            let hi = if i + 1 < n {
                (centres[i] + centres[i + 1]) / 2.0
            } else if n > 1 {
                centres[i] + (centres[i] - centres[i - 1]) / 2.0
            } else {
                centres[i] + 0.5
            };
            (lo, hi)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// SVG renderer
// ---------------------------------------------------------------------------

pub struct SvgRenderer {
    pub width: u32,
    pub height: u32,
    now: Option<DateTime<Utc>>,
}

impl Default for SvgRenderer {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 700,
            now: None,
        }
    }
}

impl SvgRenderer {
    /// Renderer that places the current-time marker at a fixed instant.
    pub fn with_now(now: DateTime<Utc>) -> Self {
        Self {
            now: Some(now),
            ..Self::default()
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}

fn draw_err<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Draw(e.to_string())
}

impl Renderer for SvgRenderer {
    fn render(
        &self,
        series: &EnsembleSeries,
        surface: &ProbabilitySurface,
        window: Option<&TimeWindow>,
        plot_mean: bool,
    ) -> Result<Figure, RenderError> {
        let (series, surface) = match window {
            Some(w) => (series.slice(w), surface.slice(w)),
            None => (series.clone(), surface.clone()),
        };
        if surface.times.is_empty() || surface.thresholds.is_empty() {
            return Err(RenderError::Empty);
        }

        let origin = surface.times[0];
        let x_of = |t: &DateTime<Utc>| hours_since_midnight(origin, *t);
        let x_centres: Vec<f64> = surface.times.iter().map(x_of).collect();
        let x_edges = cell_edges(&x_centres);
        let y_edges = cell_edges(&surface.thresholds);

        let x_range = x_edges[0].0..x_edges[x_edges.len() - 1].1;
        let y_range = y_edges[0].0..y_edges[y_edges.len() - 1].1;

        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (self.width, self.height)).into_drawing_area();
            root.fill(&WHITE).map_err(draw_err)?;

            let mut chart = ChartBuilder::on(&root)
                .margin(20)
                .caption(&surface.label, ("sans-serif", 24).into_font())
                .set_label_area_size(LabelAreaPosition::Left, 60)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .build_cartesian_2d(x_range.clone(), y_range.clone())
                .map_err(draw_err)?;

            chart
                .configure_mesh()
                .disable_mesh()
                .x_label_formatter(&|h| tick_to_label(h.round() as i64))
                .y_desc(surface.label.as_str())
                .draw()
                .map_err(draw_err)?;

            let y_edges = &y_edges;
            let cells = surface.probabilities.iter().enumerate().flat_map(|(t, row)| {
                let (x0, x1) = x_edges[t];
                row.iter().enumerate().filter_map(move |(s, p)| {
                    p.map(|p| {
                        let (y0, y1) = y_edges[s];
                        Rectangle::new([(x0, y0), (x1, y1)], level_color(p).filled())
                    })
                })
            });
            chart.draw_series(cells).map_err(draw_err)?;

            let line = |values: &[Option<f64>]| -> Vec<(f64, f64)> {
                series
                    .times()
                    .iter()
                    .zip(values)
                    .filter_map(|(t, v)| v.map(|v| (x_of(t), v)))
                    .collect()
            };

            if plot_mean {
                let mean = series.mean_by_time();
                chart
                    .draw_series(DashedLineSeries::new(line(&mean), 8, 4, RED.stroke_width(2)))
                    .map_err(draw_err)?
                    .label("Mean")
                    .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
            }

            if let Some(main) = series.main_member() {
                chart
                    .draw_series(DashedLineSeries::new(line(main), 8, 4, BLACK.stroke_width(2)))
                    .map_err(draw_err)?
                    .label("Deterministic")
                    .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLACK));
            }

            let now = self.now();
            if window.is_none_or(|w| now > w.start) {
                let x = x_of(&now);
                chart
                    .draw_series(DashedLineSeries::new(
                        vec![(x, y_range.start), (x, y_range.end)],
                        2,
                        3,
                        NOW_MARKER.stroke_width(1),
                    ))
                    .map_err(draw_err)?
                    .label("Current time")
                    .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &NOW_MARKER));
            }

            chart
                .configure_series_labels()
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(draw_err)?;

            root.present().map_err(draw_err)?;
        }

        debug!(
            times = surface.times.len(),
            thresholds = surface.thresholds.len(),
            bytes = svg.len(),
            "rendered figure"
        );
        Ok(Figure::new(svg))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
