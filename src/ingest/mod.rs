/// Upstream data acquisition.
///
/// - `meteogram` — ensemble endpoint: URL construction, fetch, page parsing
/// - `fixtures`  (test only) — representative page payloads

pub mod meteogram;

#[cfg(test)]
pub(crate) mod fixtures;
