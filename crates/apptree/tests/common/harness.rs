//! Test harness for isolated codec runs.
//!
//! Each `TestHarness` owns a temporary directory used as the application
//! root and builds codecs pointed at it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use apptree::{
    AppDocument, CancelFlag, Codec, CodecOptions, DecodeReport, EncodeReport, Result,
    StructuralVersion,
};

/// Test harness providing an isolated application root.
pub struct TestHarness {
    temp_dir: TempDir,
    /// The application root inside the temp directory.
    pub root: PathBuf,
}

impl TestHarness {
    /// Creates a harness whose root does not exist yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("app");
        Self { temp_dir, root }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Options rooted at the harness directory.
    pub fn options(&self) -> CodecOptions {
        CodecOptions::new(&self.root)
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.options())
    }

    pub fn codec_with(&self, configure: impl FnOnce(CodecOptions) -> CodecOptions) -> Codec {
        Codec::new(configure(self.options()))
    }

    pub fn encode(&self, document: &AppDocument, version: StructuralVersion) -> Result<EncodeReport> {
        self.codec().encode_all(document, version, &CancelFlag::new())
    }

    pub fn decode(&self) -> Result<DecodeReport> {
        self.codec().decode_all(&CancelFlag::new())
    }

    /// Writes a file below the root, creating parent directories.
    pub fn write_file(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn read_file(&self, relative: &str) -> String {
        std::fs::read_to_string(self.root.join(relative))
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", relative, e))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    /// Every file below the root, keyed by `/`-separated relative path.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        if !self.root.exists() {
            return files;
        }
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.expect("Failed to walk root");
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .expect("Entry outside root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(relative, std::fs::read(entry.path()).expect("Failed to read file"));
        }
        files
    }

    /// Relative paths of every file below the root, sorted.
    pub fn file_list(&self) -> Vec<String> {
        self.snapshot().into_keys().collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
