//! Typed views of individual sections.
//!
//! These are plain serde types. Convert with [`ConfigValue::from_serialize`]
//! and [`ConfigValue::deserialize_into`], or with the helpers on [`Structure`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::value::{ConfigMap, ConfigValue};

/// Config key that exempts a function from needing a source file.
pub const SOURCE_REQUIRED_FIELD: &str = "source_required";

/// Conversions shared by every typed structure.
pub trait Structure: Serialize + DeserializeOwned {
    fn to_value(&self) -> Result<ConfigValue> {
        ConfigValue::from_serialize(self)
    }

    fn from_value(value: ConfigValue) -> Result<Self> {
        value.deserialize_into()
    }
}

/// The `functions` section in the expanded layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionsStructure {
    #[serde(default)]
    pub configs: Vec<ConfigMap>,
    /// Relative `/`-separated path to source text.
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
}

impl Structure for FunctionsStructure {}

impl FunctionsStructure {
    /// Checks that every configured function has a source file.
    ///
    /// A source `foo/bar.js` satisfies the function `bar` as well as
    /// `foo/bar`. Functions marked `"source_required": false` are skipped.
    pub fn validate(&self) -> Result<()> {
        for config in &self.configs {
            let name = config
                .get("name")
                .and_then(ConfigValue::as_str)
                .ok_or_else(|| CodecError::MalformedValue {
                    path: PathBuf::from("functions/config.json"),
                    message: "function config without a name".to_string(),
                })?;

            if config.get(SOURCE_REQUIRED_FIELD).and_then(ConfigValue::as_bool) == Some(false) {
                continue;
            }

            if !self.sources.keys().any(|path| source_matches(path, name)) {
                return Err(CodecError::MissingFile {
                    path: PathBuf::from(format!("functions/{}.js", name)),
                });
            }
        }
        Ok(())
    }
}

fn source_matches(path: &str, name: &str) -> bool {
    let stem = match path.rsplit_once('.') {
        Some((stem, _)) if !stem.ends_with('/') && !stem.is_empty() => stem,
        _ => path,
    };
    stem == name || stem.ends_with(&format!("/{}", name))
}

/// One data source with its collection rules (expanded layout).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSourceStructure {
    pub config: ConfigMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rule: Option<ConfigMap>,
    /// Each rule carries `database`, `collection` and optionally `schema`
    /// and `relationships`.
    #[serde(default)]
    pub rules: Vec<ConfigMap>,
}

impl Structure for DataSourceStructure {}

/// One HTTP endpoint service with its webhooks and rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpEndpointStructure {
    pub config: ConfigMap,
    #[serde(default)]
    pub incoming_webhooks: Vec<ConfigMap>,
    #[serde(default)]
    pub rules: Vec<ConfigMap>,
}

impl Structure for HttpEndpointStructure {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthStructure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_user_data: Option<ConfigMap>,
    #[serde(default)]
    pub providers: ConfigMap,
}

impl Structure for AuthStructure {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStructure {
    #[serde(default)]
    pub config: ConfigMap,
}

impl Structure for SyncStructure {}

impl<T: Structure> Structure for Vec<T> {}
