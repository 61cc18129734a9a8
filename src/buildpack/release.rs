//! Release descriptor emitted by `bin/release`

use crate::error::{StagerError, StagerResult};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Parsed output of a buildpack's release phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Add-ons the buildpack asks for
    #[serde(default)]
    pub addons: Vec<String>,

    /// Environment variable defaults
    #[serde(default)]
    pub config_vars: BTreeMap<String, String>,

    /// Process role to start command
    #[serde(default)]
    pub default_process_types: BTreeMap<String, String>,
}

impl ReleaseInfo {
    /// Parse the YAML document a release script printed.
    ///
    /// Scalar values (numbers, booleans) in the two maps are kept as their
    /// string form; anything that is not a mapping is rejected.
    pub fn parse(buildpack: &str, output: &str) -> StagerResult<Self> {
        let invalid = |reason: String| StagerError::ReleaseInfo {
            buildpack: buildpack.to_string(),
            reason,
        };

        let doc: Value = serde_yaml::from_str(output).map_err(|e| invalid(e.to_string()))?;
        let Value::Mapping(map) = doc else {
            return Err(invalid("expected a YAML mapping".to_string()));
        };

        let section = |key: &str| -> StagerResult<BTreeMap<String, String>> {
            match map.get(key) {
                None | Some(Value::Null) => Ok(BTreeMap::new()),
                Some(Value::Mapping(entries)) => entries
                    .iter()
                    .map(|(k, v)| match (scalar(k), scalar(v)) {
                        (Some(k), Some(v)) => Ok((k, v)),
                        _ => Err(invalid(format!("{} entries must be scalars", key))),
                    })
                    .collect(),
                Some(_) => Err(invalid(format!("{} must be a mapping", key))),
            }
        };

        let addons = match map.get("addons") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items
                .iter()
                .filter(|item| !item.is_null())
                .filter_map(scalar)
                .collect(),
            Some(_) => return Err(invalid("addons must be a list".to_string())),
        };

        Ok(Self {
            addons,
            config_vars: section("config_vars")?,
            default_process_types: section("default_process_types")?,
        })
    }

    /// Start command for the `web` role, if the buildpack declares one
    pub fn web_command(&self) -> Option<&str> {
        self.default_process_types.get("web").map(String::as_str)
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
