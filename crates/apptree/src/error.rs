//! Error types for the configuration codec.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing a configuration tree.
///
/// Every variant resolves to either a filesystem path or a section name,
/// see [`CodecError::path`] and [`CodecError::section`].
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to parse JSON in '{path}' at byte {offset}: {message}")]
    Parse {
        path: PathBuf,
        offset: usize,
        message: String,
    },

    #[error("Required file is missing: '{path}'")]
    MissingFile { path: PathBuf },

    #[error("Unknown section '{name}' for structural version {version}")]
    UnknownSection { name: String, version: String },

    #[error(
        "Ambiguous structural version in '{root}': found version 1 markers [{}] and version 2 markers [{}]",
        .v1_markers.join(", "),
        .v2_markers.join(", ")
    )]
    AmbiguousVersion {
        root: PathBuf,
        v1_markers: Vec<String>,
        v2_markers: Vec<String>,
    },

    #[error("Unsupported config version '{version}' declared in '{path}'")]
    UnsupportedVersion { version: String, path: PathBuf },

    #[error("Name '{name}' collides with another entry at '{path}'")]
    NameCollision { name: String, path: PathBuf },

    #[error("Name '{name}' cannot be used as a file name at '{path}'")]
    InvalidName { name: String, path: PathBuf },

    #[error("Malformed value for '{path}': {message}")]
    MalformedValue { path: PathBuf, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    RemovePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure while writing one element of a collection. `index` is the
    /// element's zero-based position, `path` the collection directory.
    #[error("Item #{} in '{path}': {source}", .index + 1)]
    Instance {
        index: usize,
        path: PathBuf,
        #[source]
        source: Box<CodecError>,
    },

    #[error("Section '{section}': {source}")]
    Section {
        section: String,
        #[source]
        source: Box<CodecError>,
    },

    #[error("Invalid codec options in '{path}': {message}")]
    Options { path: PathBuf, message: String },
}

impl CodecError {
    /// Wraps the error with the name of the section being processed.
    ///
    /// Errors that already carry a section are returned unchanged.
    pub fn in_section(self, section: impl Into<String>) -> Self {
        match self {
            CodecError::Section { .. } | CodecError::Cancelled => self,
            other => CodecError::Section {
                section: section.into(),
                source: Box::new(other),
            },
        }
    }

    /// Wraps the error with the position of the collection element being
    /// written. Cancellation is returned unchanged.
    pub fn in_instance(self, index: usize, path: impl Into<PathBuf>) -> Self {
        match self {
            CodecError::Cancelled => self,
            other => CodecError::Instance {
                index,
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the section this error was raised in, if known.
    pub fn section(&self) -> Option<&str> {
        match self {
            CodecError::Section { section, .. } => Some(section),
            CodecError::UnknownSection { name, .. } => Some(name),
            CodecError::Instance { source, .. } => source.section(),
            _ => None,
        }
    }

    /// Returns the zero-based position of the outermost collection element
    /// this error was raised for, if any.
    pub fn instance(&self) -> Option<usize> {
        match self {
            CodecError::Instance { index, .. } => Some(*index),
            CodecError::Section { source, .. } => source.instance(),
            _ => None,
        }
    }

    /// Returns the filesystem path this error refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            CodecError::Parse { path, .. }
            | CodecError::MissingFile { path }
            | CodecError::UnsupportedVersion { path, .. }
            | CodecError::NameCollision { path, .. }
            | CodecError::InvalidName { path, .. }
            | CodecError::MalformedValue { path, .. }
            | CodecError::ReadFile { path, .. }
            | CodecError::ReadDirectory { path, .. }
            | CodecError::WriteFile { path, .. }
            | CodecError::CreateDirectory { path, .. }
            | CodecError::RemovePath { path, .. }
            | CodecError::Options { path, .. } => Some(path),
            CodecError::AmbiguousVersion { root, .. } => Some(root),
            CodecError::Section { source, .. } => source.path(),
            CodecError::Instance { path, source, .. } => source.path().or(Some(path.as_path())),
            CodecError::UnknownSection { .. } | CodecError::Cancelled => None,
        }
    }

    /// Returns the innermost error, skipping section and item context.
    pub fn root_cause(&self) -> &CodecError {
        match self {
            CodecError::Section { source, .. } | CodecError::Instance { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Returns true if the error was caused by a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), CodecError::Cancelled)
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
