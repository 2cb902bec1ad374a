//! Structural versions and detection of the version a tree was written in.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{CodecError, Result};
use crate::storage::Storage;
use crate::value::{parse_json, ConfigValue};

/// Field in the root app config that declares the structural version.
pub const VERSION_FIELD: &str = "config_version";

/// Directory layout convention a tree follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "u64")]
pub enum StructuralVersion {
    /// Legacy layout: every data source and endpoint is a service with flat rule files.
    V1,
    /// Expanded layout: data sources and HTTP endpoints have their own trees.
    V2,
}

impl StructuralVersion {
    pub const LATEST: StructuralVersion = StructuralVersion::V2;

    /// Returns all known versions, oldest first.
    pub fn all() -> &'static [StructuralVersion] {
        &[StructuralVersion::V1, StructuralVersion::V2]
    }

    /// The value written to the `config_version` field.
    pub fn id(self) -> u64 {
        match self {
            StructuralVersion::V1 => 20200603,
            StructuralVersion::V2 => 20210101,
        }
    }

    /// File holding the root app config.
    pub fn app_config_file(self) -> &'static str {
        match self {
            StructuralVersion::V1 => "config.json",
            StructuralVersion::V2 => "realm_config.json",
        }
    }

    fn from_id(id: u64) -> Option<Self> {
        match id {
            1 | 20200603 => Some(StructuralVersion::V1),
            2 | 20210101 => Some(StructuralVersion::V2),
            _ => None,
        }
    }

    /// Interprets a `config_version` value, numeric or textual.
    pub fn from_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Number(n) => n.as_u64().and_then(StructuralVersion::from_id),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for StructuralVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for StructuralVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .ok()
            .and_then(StructuralVersion::from_id)
            .ok_or_else(|| format!("Unknown structural version: {}", s))
    }
}

impl From<StructuralVersion> for u64 {
    fn from(version: StructuralVersion) -> Self {
        version.id()
    }
}

// Goes through ConfigValue so numbers work with serde_json's arbitrary precision.
impl<'de> Deserialize<'de> for StructuralVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = ConfigValue::deserialize(deserializer)?;
        StructuralVersion::from_value(&raw)
            .ok_or_else(|| de::Error::custom(format!("Unknown structural version: {}", raw)))
    }
}

const V1_MARKER_DIRS: &[&str] = &["services", "auth_providers"];
const V2_MARKER_DIRS: &[&str] = &["data_sources", "http_endpoints"];

/// Decides which layout the tree under `storage` follows.
///
/// Checks, in order: an explicit `config_version` in the root app config,
/// then version-specific directories and root app config files, then falls
/// back to the newest version for a missing or empty root. Never writes.
pub fn resolve(storage: &dyn Storage) -> Result<StructuralVersion> {
    if let Some(version) = declared_version(storage)? {
        log::debug!("Structural version {} declared in app config", version);
        return Ok(version);
    }

    let v1_markers = present_markers(storage, StructuralVersion::V1, V1_MARKER_DIRS);
    let v2_markers = present_markers(storage, StructuralVersion::V2, V2_MARKER_DIRS);

    match (v1_markers.is_empty(), v2_markers.is_empty()) {
        (false, false) => Err(CodecError::AmbiguousVersion {
            root: storage.root().to_path_buf(),
            v1_markers,
            v2_markers,
        }),
        (false, true) => Ok(StructuralVersion::V1),
        (true, false) => Ok(StructuralVersion::V2),
        (true, true) => {
            log::debug!(
                "No version markers under {}, using latest ({})",
                storage.root().display(),
                StructuralVersion::LATEST
            );
            Ok(StructuralVersion::LATEST)
        }
    }
}

/// Marker directories present for `version`, plus its root app config file.
fn present_markers(storage: &dyn Storage, version: StructuralVersion, dirs: &[&str]) -> Vec<String> {
    let mut markers: Vec<String> = dirs
        .iter()
        .filter(|d| storage.is_dir(Path::new(d)))
        .map(|d| d.to_string())
        .collect();
    let app_config = version.app_config_file();
    if storage.is_file(Path::new(app_config)) {
        markers.push(app_config.to_string());
    }
    markers
}

/// Reads `config_version` from the first root app config file present.
fn declared_version(storage: &dyn Storage) -> Result<Option<StructuralVersion>> {
    for version in [StructuralVersion::V2, StructuralVersion::V1] {
        let path = Path::new(version.app_config_file());
        let Some(bytes) = storage.read(path)? else {
            continue;
        };

        let value = parse_json(&bytes, &storage.root().join(path))?;
        let Some(declared) = value.get(VERSION_FIELD) else {
            continue;
        };

        return match StructuralVersion::from_value(declared) {
            Some(v) => Ok(Some(v)),
            None => Err(CodecError::UnsupportedVersion {
                version: declared.to_string(),
                path: storage.root().join(path),
            }),
        };
    }
    Ok(None)
}
