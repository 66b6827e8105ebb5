/// wxprob_service: ensemble weather forecasts as exceedance-probability heatmaps.
///
/// # Module structure
///
/// ```text
/// wxprob_service
/// ├── model       — shared data types (EnsembleSeries, ProbabilitySurface, errors)
/// ├── catalog     — closed Variable / Model enumerations and upstream ids
/// ├── config      — configuration loader (wxprob.toml)
/// ├── cache       — persistent three-mapping cache with explicit key types
/// ├── resolver    — fetch → content hash → cache hit or parse-and-store
/// ├── pipeline    — resolve → merge → convert → render for one request
/// ├── batch       — thread-pool runs over locations × variables × models
/// ├── render      — SVG heatmap rendering (plotters)
/// ├── ingest
/// │   ├── meteogram — ensemble endpoint URL, fetch, page parsing
/// │   └── fixtures (test only) — representative ensemble pages
/// └── analysis
///     ├── probability — exceedance-probability conversion
///     └── merge       — multi-model concatenation and gap interpolation
/// ```

/// Public modules
pub mod analysis;
pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod resolver;
