//! Directory writer: emits a section value as files.
//!
//! Emission is planned first (directories and `(path, bytes)` pairs) and then
//! flushed through [`Storage`]. Multi-instance sections flush one instance at a
//! time, so a failure on a later instance leaves earlier ones on disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::reader::instance_name_parts;
use super::schema::{Container, Entry, Field, Layout, Naming, SectionDescriptor};
use super::version::StructuralVersion;
use crate::cancel::CancelFlag;
use crate::error::{CodecError, Result};
use crate::sanitize::{is_hidden, is_valid_relative_component, redact_path, sanitize_component};
use crate::storage::Storage;
use crate::value::{ConfigMap, ConfigValue};

/// Writes one section below the storage root.
///
/// Returns the full paths of every file written, in write order. With
/// `prune` set, files and emptied directories in the section directory that
/// this call did not produce are removed afterwards. Root sections are never
/// pruned.
pub fn write_section(
    storage: &dyn Storage,
    descriptor: &SectionDescriptor,
    version: StructuralVersion,
    value: &ConfigValue,
    prune: bool,
    cancel: &CancelFlag,
) -> Result<Vec<PathBuf>> {
    let _span = tracing::info_span!(
        "codec.write_section",
        section = descriptor.name,
        version = %version,
        root = %redact_path(storage.root())
    )
    .entered();

    let base = PathBuf::from(descriptor.dir.unwrap_or(""));
    let mut writer = Writer {
        storage,
        section: descriptor.name,
        version,
        written: Vec::new(),
        kept_dirs: BTreeSet::new(),
    };

    match descriptor.layout.whole() {
        Some(entry @ (Entry::Instances { .. } | Entry::EntryFiles { .. })) => {
            let items = collection_items(entry, value, &writer.full_path(&base))?;
            writer.flush(Plan::with_dir(&base))?;

            let collection = writer.full_path(&base);
            let mut seen = BTreeSet::new();
            for (index, item) in items.iter().enumerate() {
                cancel.check()?;
                let mut plan = Plan::default();
                writer
                    .emit_item(&base, entry, item, &[], &mut seen, &mut plan)
                    .and_then(|()| writer.flush(plan))
                    .map_err(|e| e.in_instance(index, collection.clone()))?;
            }
        }
        _ => {
            let mut plan = Plan::with_dir(&base);
            writer.emit_layout(&base, &descriptor.layout, value, &mut plan)?;
            writer.flush(plan)?;
        }
    }

    if prune {
        if let Some(dir) = descriptor.dir {
            writer.prune(Path::new(dir))?;
        }
    }

    log::debug!(
        "Wrote section {} ({} files)",
        descriptor.name,
        writer.written.len()
    );
    Ok(writer
        .written
        .into_iter()
        .map(|p| storage.root().join(p))
        .collect())
}

/// Directories to create and files to write, in order.
#[derive(Debug, Default)]
struct Plan {
    dirs: Vec<PathBuf>,
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl Plan {
    fn with_dir(dir: &Path) -> Self {
        Plan {
            dirs: vec![dir.to_path_buf()],
            files: Vec::new(),
        }
    }
}

/// One element of a collection, with its map key for keyed containers.
struct Item<'v> {
    key: Option<&'v str>,
    value: &'v ConfigValue,
}

fn collection_items<'v>(entry: &Entry, value: &'v ConfigValue, path: &Path) -> Result<Vec<Item<'v>>> {
    let keyed = matches!(
        entry,
        Entry::EntryFiles {
            container: Container::Object,
            ..
        }
    );

    if keyed {
        let map = value
            .as_object()
            .ok_or_else(|| malformed(path, "an object", value))?;
        Ok(map
            .iter()
            .map(|(key, value)| Item {
                key: Some(key.as_str()),
                value,
            })
            .collect())
    } else {
        let items = value
            .as_array()
            .ok_or_else(|| malformed(path, "an array", value))?;
        Ok(items.iter().map(|value| Item { key: None, value }).collect())
    }
}

fn has_hidden_component(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str().to_str().is_some_and(is_hidden))
}

fn malformed(path: &Path, expected: &str, found: &ConfigValue) -> CodecError {
    CodecError::MalformedValue {
        path: path.to_path_buf(),
        message: format!("expected {}, found {}", expected, found.type_name()),
    }
}

struct Writer<'a> {
    storage: &'a dyn Storage,
    section: &'static str,
    version: StructuralVersion,
    written: Vec<PathBuf>,
    kept_dirs: BTreeSet<PathBuf>,
}

impl Writer<'_> {
    fn full_path(&self, path: &Path) -> PathBuf {
        self.storage.root().join(path)
    }

    fn flush(&mut self, plan: Plan) -> Result<()> {
        for dir in plan.dirs {
            if self.kept_dirs.insert(dir.clone()) {
                self.storage.create_dir_all(&dir)?;
            }
        }
        for (path, bytes) in plan.files {
            self.storage.write(&path, &bytes)?;
            log::trace!("Wrote {}", path.display());
            self.written.push(path);
        }
        Ok(())
    }

    fn emit_layout(&self, base: &Path, layout: &Layout, value: &ConfigValue, plan: &mut Plan) -> Result<()> {
        if let Some(entry) = layout.whole() {
            return self.emit_entry(base, layout, entry, Some(value), plan);
        }

        let object = value
            .as_object()
            .ok_or_else(|| malformed(&self.full_path(base), "an object", value))?;
        let claimed: Vec<&str> = layout.claimed_keys().collect();

        if !layout.has_rest() {
            for key in object.keys().filter(|k| !claimed.contains(&k.as_str())) {
                log::warn!(
                    "Dropping field '{}' of section {} at {}: version {} has no file for it",
                    key,
                    self.section,
                    redact_path(&self.full_path(base)),
                    self.version
                );
            }
        }

        for entry in layout.entries {
            match entry.field() {
                Field::Rest => {
                    let rest: ConfigMap = object
                        .iter()
                        .filter(|(k, _)| !claimed.contains(&k.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    self.emit_entry(base, layout, entry, Some(&ConfigValue::Object(rest)), plan)?;
                }
                Field::Key(key) => self.emit_entry(base, layout, entry, object.get(key), plan)?,
                Field::Whole => self.emit_entry(base, layout, entry, Some(value), plan)?,
            }
        }
        Ok(())
    }

    fn emit_entry(
        &self,
        base: &Path,
        layout: &Layout,
        entry: &Entry,
        value: Option<&ConfigValue>,
        plan: &mut Plan,
    ) -> Result<()> {
        let Some(value) = value else {
            return match *entry {
                Entry::Json {
                    file,
                    required: true,
                    ..
                }
                | Entry::Verbatim {
                    file,
                    required: true,
                    ..
                } => Err(CodecError::MalformedValue {
                    path: self.full_path(&base.join(file)),
                    message: format!("missing field '{}'", entry.field().key().unwrap_or(file)),
                }),
                _ if entry.reads_base_dir() => Err(CodecError::MalformedValue {
                    path: self.full_path(base),
                    message: format!("missing field '{}'", entry.field().key().unwrap_or_default()),
                }),
                _ => Ok(()),
            };
        };

        match *entry {
            Entry::Json { file, .. } => {
                plan.files.push((base.join(file), value.to_canonical_json()?));
            }
            Entry::Verbatim { file, .. } => {
                let path = base.join(file);
                let text = value
                    .as_str()
                    .ok_or_else(|| malformed(&self.full_path(&path), "a string", value))?;
                plan.files.push((path, text.as_bytes().to_vec()));
            }
            Entry::VerbatimTree { .. } => self.emit_verbatim_tree(base, layout, value, plan)?,
            Entry::Instances { dir, .. } | Entry::EntryFiles { dir, .. } => {
                let collection_base = base.join(dir);
                let items = collection_items(entry, value, &self.full_path(&collection_base))?;
                let reserved = if dir.is_empty() {
                    layout.reserved_names()
                } else {
                    Vec::new()
                };

                plan.dirs.push(collection_base.clone());
                let mut seen = BTreeSet::new();
                for (index, item) in items.iter().enumerate() {
                    self.emit_item(&collection_base, entry, item, &reserved, &mut seen, plan)
                        .map_err(|e| e.in_instance(index, self.full_path(&collection_base)))?;
                }
            }
        }
        Ok(())
    }

    fn emit_verbatim_tree(&self, base: &Path, layout: &Layout, value: &ConfigValue, plan: &mut Plan) -> Result<()> {
        let sources = value
            .as_object()
            .ok_or_else(|| malformed(&self.full_path(base), "an object", value))?;
        let reserved = layout.reserved_names();

        for (relative, text) in sources {
            let components: Vec<&str> = relative.split('/').collect();
            if !components.iter().all(|c| is_valid_relative_component(c)) {
                return Err(CodecError::InvalidName {
                    name: relative.clone(),
                    path: self.full_path(base),
                });
            }
            if reserved.iter().any(|r| *r == components[0]) {
                return Err(CodecError::NameCollision {
                    name: relative.clone(),
                    path: self.full_path(&base.join(components[0])),
                });
            }

            let path = components.iter().fold(base.to_path_buf(), |p, c| p.join(c));
            let text = text
                .as_str()
                .ok_or_else(|| malformed(&self.full_path(&path), "a string", text))?;
            if let Some(parent) = path.parent() {
                if parent != base {
                    plan.dirs.push(parent.to_path_buf());
                }
            }
            plan.files.push((path, text.as_bytes().to_vec()));
        }
        Ok(())
    }

    /// Emits one collection element below `base`, checking its name against
    /// names already used in the same parent and names reserved there.
    fn emit_item(
        &self,
        base: &Path,
        entry: &Entry,
        item: &Item<'_>,
        reserved: &[&str],
        seen: &mut BTreeSet<String>,
        plan: &mut Plan,
    ) -> Result<()> {
        match *entry {
            Entry::Instances { naming, layout, .. } => {
                let components = self.instance_components(base, naming, item.value)?;
                let key = components.join("/");
                self.claim_name(base, &key, &components[0], reserved, seen)?;

                let mut dir = base.to_path_buf();
                for component in &components {
                    dir.push(component);
                    plan.dirs.push(dir.clone());
                }
                self.emit_layout(&dir, layout, item.value, plan)
            }
            Entry::EntryFiles { naming, .. } => {
                let raw = match item.key {
                    Some(key) => key.to_string(),
                    None => instance_name_parts(item.value, naming)
                        .map(|parts| parts.join("."))
                        .unwrap_or_default(),
                };
                let file_name = sanitize_component(&raw)
                    .map(|name| format!("{}.json", name))
                    .ok_or_else(|| CodecError::InvalidName {
                        name: raw.clone(),
                        path: self.full_path(base),
                    })?;
                self.claim_name(base, &file_name, &file_name, reserved, seen)?;
                plan.files.push((base.join(file_name), item.value.to_canonical_json()?));
                Ok(())
            }
            Entry::Json { .. } | Entry::Verbatim { .. } | Entry::VerbatimTree { .. } => Ok(()),
        }
    }

    fn instance_components(&self, base: &Path, naming: Naming, value: &ConfigValue) -> Result<Vec<String>> {
        let parts = instance_name_parts(value, naming).ok_or_else(|| CodecError::InvalidName {
            name: String::new(),
            path: self.full_path(base),
        })?;
        parts
            .iter()
            .map(|part| {
                sanitize_component(part).ok_or_else(|| CodecError::InvalidName {
                    name: part.clone(),
                    path: self.full_path(base),
                })
            })
            .collect()
    }

    fn claim_name(
        &self,
        base: &Path,
        key: &str,
        first: &str,
        reserved: &[&str],
        seen: &mut BTreeSet<String>,
    ) -> Result<()> {
        if reserved.iter().any(|r| *r == first) || !seen.insert(key.to_string()) {
            return Err(CodecError::NameCollision {
                name: key.to_string(),
                path: self.full_path(&base.join(key)),
            });
        }
        Ok(())
    }

    /// Removes files below `dir` this call did not write, then every empty
    /// directory below `dir` it did not create, deepest first. Hidden entries
    /// are left alone.
    fn prune(&self, dir: &Path) -> Result<()> {
        let written: BTreeSet<&PathBuf> = self.written.iter().collect();

        for relative in self.storage.walk_files(dir)? {
            let path = dir.join(&relative);
            if has_hidden_component(&relative) || written.contains(&path) {
                continue;
            }
            log::info!("Pruning stale file {}", redact_path(&self.full_path(&path)));
            self.storage.remove_file(&path)?;
        }

        let mut candidates: Vec<PathBuf> = self
            .storage
            .walk_dirs(dir)?
            .into_iter()
            .filter(|relative| !has_hidden_component(relative))
            .map(|relative| dir.join(relative))
            .collect();
        // Longer paths first, so children go before their parents.
        candidates.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for candidate in candidates {
            if self.kept_dirs.contains(&candidate) {
                continue;
            }
            if self.storage.list_dir(&candidate)?.is_empty() {
                log::debug!("Removing empty directory {}", redact_path(&self.full_path(&candidate)));
                self.storage.remove_dir(&candidate)?;
            }
        }
        Ok(())
    }
}
