/// Ensemble meteogram endpoint client.
///
/// Handles URL construction, the blocking fetch, and extraction of the
/// ensemble series declared inside the returned HTML fragment. See
/// `fixtures.rs` for annotated examples of the page structure.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::catalog::{Model, Variable};
use crate::config::FetchConfig;
use crate::model::{EnsembleSeries, FetchError, MemberId};
use crate::resolver::EnsembleSource;

// ---------------------------------------------------------------------------
// Page markers
// ---------------------------------------------------------------------------

/// Attribute identifying the inline script that carries the data.
const SCRIPT_TYPE: &str = "text/javascript";

/// Declaration preceding the series list inside that script.
pub const DATA_MARKER: &str = "var hcensemblelong_data = ";

// ---------------------------------------------------------------------------
// Serde structures for the series list
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawMember {
    name: serde_json::Value,
    #[serde(default)]
    data: Vec<Vec<Option<f64>>>,
}

impl RawMember {
    fn member_name(&self) -> String {
        match &self.name {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Builds the ensemble endpoint URL for one location/variable/model.
///
/// # Example
/// ```
/// use wxprob_service::catalog::{Model, Variable};
/// use wxprob_service::ingest::meteogram::build_ensemble_url;
///
/// let url = build_ensemble_url(
///     "https://meteologix.com/uk/ajax/ensemble",
///     2867714,
///     Variable::Temperature,
///     Model::Ecmwf,
/// );
/// assert!(url.contains("city_id=2867714"));
/// ```
pub fn build_ensemble_url(base_url: &str, location: u64, variable: Variable, model: Model) -> String {
    format!(
        "{}?city_id={}&model={}&model_view=&param={}",
        base_url,
        location,
        urlencoding::encode(model.upstream_id()),
        urlencoding::encode(variable.upstream_id()),
    )
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Blocking client for the ensemble endpoint.
pub struct MeteogramClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl MeteogramClient {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

impl EnsembleSource for MeteogramClient {
    fn fetch(&self, location: u64, variable: Variable, model: Model) -> Result<String, FetchError> {
        let url = build_ensemble_url(&self.base_url, location, variable, model);
        info!(location, %variable, %model, "fetching ensemble page");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Http(response.status().as_u16()));
        }

        response.text().map_err(|e| FetchError::Transport(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

/// Parses an ensemble page into a series.
///
/// # Errors
/// - `FetchError::NoData` — no inline script, no data declaration, or an
///   empty series list. The upstream serves these when it has nothing for
///   the requested combination.
/// - `FetchError::Parse` — the declaration is present but cannot be decoded.
pub fn parse_page(html: &str) -> Result<EnsembleSeries, FetchError> {
    let script = first_inline_script(html)
        .ok_or_else(|| FetchError::NoData("page has no inline script".to_string()))?;

    let start = script
        .find(DATA_MARKER)
        .ok_or_else(|| FetchError::NoData("ensemble data declaration not found".to_string()))?;
    let declaration = &script[start + DATA_MARKER.len()..];

    let array = balanced_array(declaration)
        .ok_or_else(|| FetchError::Parse("unterminated ensemble data declaration".to_string()))?;
    let json = strip_trailing_commas(&array.replace('\'', "\""));

    let members: Vec<RawMember> = serde_json::from_str(&json)
        .map_err(|e| FetchError::Parse(format!("JSON deserialization failed: {}", e)))?;

    extract_series(members)
}

/// Body of the first `<script type="text/javascript">` element.
fn first_inline_script(html: &str) -> Option<&str> {
    let mut rest = html;
    while let Some(open) = rest.find("<script") {
        let after_open = &rest[open..];
        let tag_end = after_open.find('>')?;
        let tag = &after_open[..tag_end];
        let body = &after_open[tag_end + 1..];
        if tag.contains(SCRIPT_TYPE) {
            let close = body.find("</script>").unwrap_or(body.len());
            return Some(&body[..close]);
        }
        rest = body;
    }
    None
}

/// Slice from the first `[` to its matching `]`, skipping brackets inside
/// quoted strings.
fn balanced_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drops commas that directly precede a closing `}` or `]`.
fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[idx + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Lays members out on the sorted union of their timestamps.
///
/// Points a member does not report, and JSON nulls, become missing values.
fn extract_series(members: Vec<RawMember>) -> Result<EnsembleSeries, FetchError> {
    if members.is_empty() {
        return Err(FetchError::NoData("ensemble data declaration is empty".to_string()));
    }

    let mut rows: Vec<(String, BTreeMap<i64, Option<f64>>)> = Vec::with_capacity(members.len());
    let mut stamps: BTreeSet<i64> = BTreeSet::new();

    for member in members {
        let name = member.member_name();
        let mut points = BTreeMap::new();
        for point in &member.data {
            let (Some(Some(ms)), value) = (point.first(), point.get(1).copied().flatten()) else {
                return Err(FetchError::Parse(format!("member '{}' has a point without a timestamp", name)));
            };
            let ms = *ms as i64;
            stamps.insert(ms);
            points.insert(ms, value);
        }
        rows.push((name, points));
    }

    let times: Vec<DateTime<Utc>> = stamps
        .iter()
        .map(|&ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| FetchError::Parse(format!("timestamp out of range: {}", ms)))
        })
        .collect::<Result<_, _>>()?;

    let (names, values): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .map(|(name, points)| {
            let row = stamps.iter().map(|ms| points.get(ms).copied().flatten()).collect();
            (MemberId::Named(name), row)
        })
        .unzip();

    debug!(members = names.len(), times = times.len(), "parsed ensemble page");
    EnsembleSeries::new(names, times, values).map_err(|e| FetchError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
