//! Options consumed by the codec.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::StructuralVersion;
use crate::error::{CodecError, Result};

/// Settings for one codec invocation.
///
/// Every field has a default, so an options file only needs the keys it
/// changes:
///
/// ```yaml
/// rootDir: ./my-app
/// version: v2
/// prune: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    /// Directory holding the application tree.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Structural version to use instead of detecting it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<StructuralVersion>,

    /// Remove files under a written section that the write did not produce.
    #[serde(default)]
    pub prune: bool,

    /// Keep going past failing sections and report them together.
    #[serde(default)]
    pub best_effort: bool,

    /// Process sections on worker threads.
    #[serde(default)]
    pub parallel: bool,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            version: None,
            prune: false,
            best_effort: false,
            parallel: false,
        }
    }
}

impl CodecOptions {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Loads options from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CodecError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let options = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        };
        options.map_err(|message| CodecError::Options {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_yaml_str(content: &str) -> std::result::Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    fn from_json_str(content: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    pub fn with_version(mut self, version: StructuralVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}
