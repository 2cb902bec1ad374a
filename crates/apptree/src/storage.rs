//! Filesystem access used by the reader and writer.
//!
//! All paths passed to a [`Storage`] are relative to its root. The codec
//! only talks to this trait, so it can run against the real disk or against
//! [`MemoryStorage`] in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use walkdir::WalkDir;

use crate::error::{CodecError, Result};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Minimal filesystem surface needed by the codec.
pub trait Storage: Send + Sync {
    /// Root the relative paths are resolved against, used in messages.
    fn root(&self) -> &Path;

    /// Reads a file. Returns `Ok(None)` if it does not exist.
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    fn is_dir(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    /// Lists the immediate children of a directory, sorted by name.
    ///
    /// A missing directory yields an empty list.
    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Lists every file below a directory, as paths relative to that
    /// directory, sorted lexicographically.
    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Lists every directory below a directory, excluding itself, as sorted
    /// relative paths. Symbolic links are not followed.
    fn walk_dirs(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Writes a file, replacing any existing content. Parent directories must exist.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;
}

/// Storage backed by a real directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    fn walk(&self, path: &Path, follow_links: bool, keep: impl Fn(fs::FileType) -> bool) -> Result<Vec<PathBuf>> {
        let full = self.full(path);
        if !full.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&full)
            .min_depth(1)
            .follow_links(follow_links)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| CodecError::ReadDirectory {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| full.clone()),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
            })?;
            if !keep(entry.file_type()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&full) {
                found.push(relative.to_path_buf());
            }
        }
        found.sort();
        Ok(found)
    }
}

impl Storage for DiskStorage {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let full = self.full(path);
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CodecError::ReadFile {
                path: full,
                source: e,
            }),
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.full(path).is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.full(path).is_file()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let full = self.full(path);
        let read_dir = match fs::read_dir(&full) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CodecError::ReadDirectory {
                    path: full,
                    source: e,
                })
            }
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CodecError::ReadDirectory {
                path: full.clone(),
                source: e,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                log::warn!(
                    "Skipping non UTF-8 entry {:?} in {}",
                    entry.file_name(),
                    full.display()
                );
                continue;
            };
            entries.push(DirEntry {
                name,
                is_dir: entry.path().is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.walk(path, true, |t| t.is_file())
    }

    fn walk_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.walk(path, false, |t| t.is_dir())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        fs::create_dir_all(&full).map_err(|e| CodecError::CreateDirectory {
            path: full,
            source: e,
        })
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let full = self.full(path);
        fs::write(&full, contents).map_err(|e| CodecError::WriteFile {
            path: full,
            source: e,
        })
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        fs::remove_file(&full).map_err(|e| CodecError::RemovePath {
            path: full,
            source: e,
        })
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        fs::remove_dir(&full).map_err(|e| CodecError::RemovePath {
            path: full,
            source: e,
        })
    }
}

#[derive(Debug, Default)]
struct MemoryTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

/// In-memory storage double.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    root: PathBuf,
    tree: Mutex<MemoryTree>,
}

/// Normalizes `a/./b` and `a/b/` to `a/b`, and `""`/`.` to the empty path.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryTree> {
        // A poisoned lock only means a test thread panicked mid-write.
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seeds a file, creating its parent directories.
    pub fn insert(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let path = normalize(path.as_ref());
        let mut tree = self.lock();
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.as_os_str().is_empty() {
                tree.dirs.insert(ancestor.to_path_buf());
            }
        }
        tree.files.insert(path, contents.into());
    }

    /// Returns every file currently stored, sorted by path.
    pub fn files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.lock().files.clone()
    }

    /// Returns a file's content as UTF-8 text.
    pub fn read_string(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock()
            .files
            .get(&normalize(path.as_ref()))
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

impl Storage for MemoryStorage {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().files.get(&normalize(path)).cloned())
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = normalize(path);
        path.as_os_str().is_empty() || self.lock().dirs.contains(&path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.lock().files.contains_key(&normalize(path))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let path = normalize(path);
        let tree = self.lock();
        let child_name = |p: &PathBuf| -> Option<String> {
            if p.parent() == Some(path.as_path()) {
                p.file_name().and_then(|n| n.to_str()).map(str::to_string)
            } else {
                None
            }
        };

        let mut entries: Vec<DirEntry> = tree
            .dirs
            .iter()
            .filter_map(|d| child_name(d).map(|name| DirEntry { name, is_dir: true }))
            .chain(tree.files.keys().filter_map(|f| {
                child_name(f).map(|name| DirEntry {
                    name,
                    is_dir: false,
                })
            }))
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let path = normalize(path);
        Ok(self
            .lock()
            .files
            .keys()
            .filter_map(|f| f.strip_prefix(&path).ok().map(Path::to_path_buf))
            .filter(|f| !f.as_os_str().is_empty())
            .collect())
    }

    fn walk_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let path = normalize(path);
        Ok(self
            .lock()
            .dirs
            .iter()
            .filter_map(|d| d.strip_prefix(&path).ok().map(Path::to_path_buf))
            .filter(|d| !d.as_os_str().is_empty())
            .collect())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            if tree.files.contains_key(ancestor) {
                return Err(CodecError::CreateDirectory {
                    path: ancestor.to_path_buf(),
                    source: std::io::Error::new(ErrorKind::AlreadyExists, "file exists"),
                });
            }
            tree.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.lock();
        let parent_ok = path
            .parent()
            .map(|p| p.as_os_str().is_empty() || tree.dirs.contains(p))
            .unwrap_or(true);
        if !parent_ok || tree.dirs.contains(&path) {
            return Err(CodecError::WriteFile {
                path,
                source: std::io::Error::new(ErrorKind::NotFound, "parent directory missing"),
            });
        }
        tree.files.insert(path, contents.to_vec());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let path = normalize(path);
        match self.lock().files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(CodecError::RemovePath {
                path,
                source: std::io::Error::new(ErrorKind::NotFound, "no such file"),
            }),
        }
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.lock();
        let occupied = tree.files.keys().any(|f| f.starts_with(&path))
            || tree.dirs.iter().any(|d| d != &path && d.starts_with(&path));
        if occupied || !tree.dirs.remove(&path) {
            return Err(CodecError::RemovePath {
                path,
                source: std::io::Error::other("directory missing or not empty"),
            });
        }
        Ok(())
    }
}
