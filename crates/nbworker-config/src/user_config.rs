//! Per-session values the host injects into the guest
//!
//! These are pass-through values: the worker only reads
//! `runtime.auto_instantiate`; every other namespace is preserved verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Query parameters of the page that opened the notebook
pub type QueryParams = BTreeMap<String, QueryValue>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl QueryValue {
    fn push(self, value: String) -> Self {
        match self {
            QueryValue::One(first) => QueryValue::Many(vec![first, value]),
            QueryValue::Many(mut values) => {
                values.push(value);
                QueryValue::Many(values)
            }
        }
    }
}

/// Build query parameters from `key=value` pairs; repeated keys collect into a list.
pub fn query_params_from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<QueryParams, String> {
    let mut params = QueryParams::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid query parameter '{}': expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid query parameter '{}': empty key", pair));
        }
        let value = value.to_string();
        let entry = match params.remove(key) {
            Some(existing) => existing.push(value),
            None => QueryValue::One(value),
        };
        params.insert(key.to_string(), entry);
    }
    Ok(params)
}

/// User preferences bound to the notebook session
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UserConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub labdata: LabdataConfig,
    /// Any other namespaces, untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserConfig {
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Whether the session runs every cell as soon as it is instantiated
    #[serde(default = "default_auto_instantiate")]
    pub auto_instantiate: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_instantiate: default_auto_instantiate(),
            extra: Map::new(),
        }
    }
}

fn default_auto_instantiate() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Oauth,
    Token,
}

/// Data-provider integration preferences, passed through to the guest
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LabdataConfig {
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub credentials_path: String,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
