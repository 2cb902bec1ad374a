//! The whole-application document exchanged with the remote service.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::schema::{sections, SECTION_APP};
use super::version::{StructuralVersion, VERSION_FIELD};
use crate::error::{CodecError, Result};
use crate::value::{ConfigMap, ConfigValue};

/// A document whose top-level keys are section names.
///
/// Sections are kept in insertion order; [`AppDocument::sorted_for`] puts
/// them in registry order for a version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppDocument {
    sections: IndexMap<String, ConfigValue>,
}

impl AppDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from a JSON object value.
    pub fn from_value(value: ConfigValue) -> Result<Self> {
        match value {
            ConfigValue::Object(map) => Ok(AppDocument {
                sections: map.into_iter().collect(),
            }),
            other => Err(CodecError::MalformedValue {
                path: PathBuf::new(),
                message: format!("document must be an object, found {}", other.type_name()),
            }),
        }
    }

    pub fn into_value(self) -> ConfigValue {
        ConfigValue::Object(self.sections.into_iter().collect::<ConfigMap>())
    }

    pub fn section(&self, name: &str) -> Option<&ConfigValue> {
        self.sections.get(name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut ConfigValue> {
        self.sections.get_mut(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ConfigValue) -> Option<ConfigValue> {
        self.sections.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<ConfigValue> {
        self.sections.shift_remove(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// The `config_version` declared in the app section, if any.
    pub fn declared_version(&self) -> Option<StructuralVersion> {
        self.section(SECTION_APP)
            .and_then(|app| app.get(VERSION_FIELD))
            .and_then(StructuralVersion::from_value)
    }

    /// Reorders sections to the registry order of `version`; unknown
    /// sections keep their relative order at the end.
    pub fn sorted_for(mut self, version: StructuralVersion) -> Self {
        let order: Vec<&str> = sections(version).iter().map(|s| s.name).collect();
        self.sections.sort_by(|a, _, b, _| {
            let rank = |name: &str| order.iter().position(|n| *n == name).unwrap_or(order.len());
            rank(a).cmp(&rank(b))
        });
        self
    }

    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        self.clone().into_value().to_canonical_json()
    }
}

impl Serialize for AppDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.sections.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AppDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = ConfigValue::deserialize(deserializer)?;
        AppDocument::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl FromIterator<(String, ConfigValue)> for AppDocument {
    fn from_iter<I: IntoIterator<Item = (String, ConfigValue)>>(iter: I) -> Self {
        AppDocument {
            sections: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            AppDocument::from_value(json!([1, 2]).into()),
            Err(CodecError::MalformedValue { .. })
        ));
    }

    #[test]
    fn test_sorted_for_registry_order() {
        let doc: AppDocument = serde_json::from_value(json!({
            "custom": {},
            "values": [],
            "functions": {"configs": [], "sources": {}},
            "app": {"name": "x"}
        }))
        .unwrap();

        let names: Vec<&str> = doc.section_names().collect();
        assert_eq!(names, vec!["custom", "values", "functions", "app"]);

        let sorted = doc.sorted_for(StructuralVersion::V2);
        let names: Vec<&str> = sorted.section_names().collect();
        assert_eq!(names, vec!["app", "functions", "values", "custom"]);
    }

    #[test]
    fn test_declared_version() {
        let mut doc = AppDocument::new();
        assert_eq!(doc.declared_version(), None);
        doc.insert("app", json!({"config_version": 20200603}).into());
        assert_eq!(doc.declared_version(), Some(StructuralVersion::V1));
    }

    #[test]
    fn test_canonical_json_sorts_sections() {
        let mut doc = AppDocument::new();
        doc.insert("sync", json!({"config": {"development_mode_enabled": false}}).into());
        doc.insert("app", json!({"name": "x"}).into());
        let text = String::from_utf8(doc.to_canonical_json().unwrap()).unwrap();
        assert!(text.find("\"app\"").unwrap() < text.find("\"sync\"").unwrap());
    }
}
