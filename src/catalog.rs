/// Variable and model registry.
///
/// The set of forecast variables and ensemble models is closed and static.
/// Each entry pairs the canonical name used throughout this crate with the
/// identifier the upstream site expects in its query string. Everything
/// else treats these as opaque lookup keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unknown name in a lookup. Fatal: callers fail fast instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

/// Normalizes user input: case-insensitive, spaces and dashes read as `_`.
fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Turns `dew_point` into `Dew point`.
fn display_label(canonical: &str) -> String {
    let spaced = canonical.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Precipitation,
    AccumulatedPrecipitation,
    Snow,
    Temperature,
    Humidity,
    DewPoint,
    Pressure,
    WindGusts,
    RadarReflectivity,
    Cape,
}

impl Variable {
    pub const ALL: [Variable; 10] = [
        Variable::Precipitation,
        Variable::AccumulatedPrecipitation,
        Variable::Snow,
        Variable::Temperature,
        Variable::Humidity,
        Variable::DewPoint,
        Variable::Pressure,
        Variable::WindGusts,
        Variable::RadarReflectivity,
        Variable::Cape,
    ];

    pub fn canonical_name(self) -> &'static str {
        match self {
            Variable::Precipitation => "precipitation",
            Variable::AccumulatedPrecipitation => "accumulated_precipitation",
            Variable::Snow => "snow",
            Variable::Temperature => "temperature",
            Variable::Humidity => "humidity",
            Variable::DewPoint => "dew_point",
            Variable::Pressure => "pressure",
            Variable::WindGusts => "wind_gusts",
            Variable::RadarReflectivity => "radar_reflectivity",
            Variable::Cape => "cape",
        }
    }

    /// Value of the upstream `param` query parameter.
    pub fn upstream_id(self) -> &'static str {
        match self {
            Variable::Precipitation => "niederschlag",
            Variable::AccumulatedPrecipitation => "niederschlagssumme",
            Variable::Snow => "schnee",
            Variable::Temperature => "temperatur",
            Variable::Humidity => "relfeuchte",
            Variable::DewPoint => "taupunkt",
            Variable::Pressure => "luftdruck",
            Variable::WindGusts => "windboeen",
            Variable::RadarReflectivity => "reflektivitaet",
            Variable::Cape => "mlcape",
        }
    }

    pub fn label(self) -> String {
        display_label(self.canonical_name())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl FromStr for Variable {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Variable::ALL
            .into_iter()
            .find(|v| v.canonical_name() == wanted)
            .ok_or_else(|| CatalogError::UnknownVariable(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Ensemble models offered upstream. Ordered so model sets can be sorted
/// into stable cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    IconD2,
    IconEu,
    Icon,
    Ecmwf,
    Gfs,
    Gem,
}

impl Model {
    pub const ALL: [Model; 6] = [
        Model::IconD2,
        Model::IconEu,
        Model::Icon,
        Model::Ecmwf,
        Model::Gfs,
        Model::Gem,
    ];

    /// Default selection for interactive requests.
    pub const DEFAULT_SELECTION: [Model; 2] = [Model::IconD2, Model::Ecmwf];

    pub fn canonical_name(self) -> &'static str {
        match self {
            Model::IconD2 => "icon_d2",
            Model::IconEu => "icon_eu",
            Model::Icon => "icon",
            Model::Ecmwf => "ecmwf",
            Model::Gfs => "gfs",
            Model::Gem => "gem",
        }
    }

    /// Value of the upstream `model` query parameter.
    pub fn upstream_id(self) -> &'static str {
        match self {
            Model::IconD2 => "icon-d2-eps",
            Model::IconEu => "icon-eu-eps",
            Model::Icon => "icon-eps",
            Model::Ecmwf => "euro",
            Model::Gfs => "us",
            Model::Gem => "gem-eps",
        }
    }

    pub fn label(self) -> String {
        display_label(self.canonical_name())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl FromStr for Model {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Model::ALL
            .into_iter()
            .find(|m| m.canonical_name() == wanted)
            .ok_or_else(|| CatalogError::UnknownModel(s.to_string()))
    }
}

/// Parses a comma-separated model list such as `"icon_d2,ecmwf"`.
pub fn parse_models(list: &str) -> Result<Vec<Model>, CatalogError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Model::from_str)
        .collect()
}

/// Joins model labels the way figure captions show them: `Icon d2+Ecmwf`.
pub fn models_caption(models: &[Model]) -> String {
    models
        .iter()
        .map(|m| m.label())
        .collect::<Vec<_>>()
        .join("+")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_variable_lookup_is_case_insensitive() {
        assert_eq!("Temperature".parse::<Variable>(), Ok(Variable::Temperature));
        assert_eq!("dew point".parse::<Variable>(), Ok(Variable::DewPoint));
        assert_eq!("WIND_GUSTS".parse::<Variable>(), Ok(Variable::WindGusts));
    }

    #[test]
    fn test_unknown_variable_fails() {
        assert_eq!(
            "super_cell_index".parse::<Variable>(),
            Err(CatalogError::UnknownVariable("super_cell_index".to_string()))
        );
    }

    #[test]
    fn test_temperature_upstream_id() {
        assert_eq!(Variable::Temperature.upstream_id(), "temperatur");
        assert_eq!(Variable::Cape.upstream_id(), "mlcape");
    }

    #[test]
    fn test_upstream_ids_are_unique() {
        let vars: HashSet<_> = Variable::ALL.iter().map(|v| v.upstream_id()).collect();
        assert_eq!(vars.len(), Variable::ALL.len());
        let models: HashSet<_> = Model::ALL.iter().map(|m| m.upstream_id()).collect();
        assert_eq!(models.len(), Model::ALL.len());
    }

    #[test]
    fn test_canonical_names_round_trip() {
        for v in Variable::ALL {
            assert_eq!(v.canonical_name().parse::<Variable>(), Ok(v));
        }
        for m in Model::ALL {
            assert_eq!(m.canonical_name().parse::<Model>(), Ok(m));
        }
    }

    #[test]
    fn test_parse_models_list() {
        let models = parse_models("icon_d2, Ecmwf").expect("known models");
        assert_eq!(models, vec![Model::IconD2, Model::Ecmwf]);
        assert!(parse_models("icon_d2,nope").is_err());
        assert!(parse_models("").expect("empty list parses").is_empty());
    }

    #[test]
    fn test_labels() {
        assert_eq!(Variable::DewPoint.label(), "Dew point");
        assert_eq!(models_caption(&[Model::IconD2, Model::Ecmwf]), "Icon d2+Ecmwf");
    }
}
