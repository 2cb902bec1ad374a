//! Directory reader: rebuilds a section value from its files.

use std::path::{Path, PathBuf};

use super::schema::{Container, Entry, Field, Layout, Naming, SectionDescriptor};
use super::version::StructuralVersion;
use crate::cancel::CancelFlag;
use crate::error::{CodecError, Result};
use crate::sanitize::{is_hidden, redact_path};
use crate::storage::Storage;
use crate::value::{parse_json, ConfigMap, ConfigValue};

const JSON_EXT: &str = ".json";

/// Reads one section from the tree.
///
/// Returns `Ok(None)` when the section's directory (or, for root sections,
/// every one of its files) is absent. A single malformed or missing required
/// file fails the whole section, reported with its path.
pub fn read_section(
    storage: &dyn Storage,
    descriptor: &SectionDescriptor,
    version: StructuralVersion,
    cancel: &CancelFlag,
) -> Result<Option<ConfigValue>> {
    let base = PathBuf::from(descriptor.dir.unwrap_or(""));

    let present = match descriptor.dir {
        Some(dir) => storage.is_dir(Path::new(dir)),
        None => descriptor
            .layout
            .reserved_names()
            .iter()
            .any(|f| storage.is_file(Path::new(f))),
    };
    if !present {
        log::debug!("Section {} not present, skipping", descriptor.name);
        return Ok(None);
    }

    let _span = tracing::info_span!(
        "codec.read_section",
        section = descriptor.name,
        version = %version,
        root = %redact_path(storage.root())
    )
    .entered();

    let reader = Reader { storage, cancel };
    let value = reader.read_layout(&base, &descriptor.layout)?;
    log::debug!("Read section {} ({})", descriptor.name, value.type_name());
    Ok(Some(value))
}

struct Reader<'a> {
    storage: &'a dyn Storage,
    cancel: &'a CancelFlag,
}

impl Reader<'_> {
    fn full_path(&self, path: &Path) -> PathBuf {
        self.storage.root().join(path)
    }

    fn read_layout(&self, base: &Path, layout: &Layout) -> Result<ConfigValue> {
        if let Some(entry) = layout.whole() {
            let value = self.read_entry(base, layout, entry)?;
            return Ok(value.unwrap_or_else(|| empty_for(entry)));
        }

        let mut object = ConfigMap::new();

        for entry in layout.entries.iter().filter(|e| e.field() == Field::Rest) {
            match self.read_entry(base, layout, entry)? {
                Some(ConfigValue::Object(map)) => object.extend(map),
                Some(other) => {
                    return Err(CodecError::MalformedValue {
                        path: self.full_path(&entry_path(base, entry)),
                        message: format!("expected an object, found {}", other.type_name()),
                    })
                }
                None => {}
            }
        }

        for entry in layout.entries {
            let Field::Key(key) = entry.field() else {
                continue;
            };
            if let Some(value) = self.read_entry(base, layout, entry)? {
                object.insert(key.to_string(), value);
            }
        }

        Ok(ConfigValue::Object(object))
    }

    fn read_entry(&self, base: &Path, layout: &Layout, entry: &Entry) -> Result<Option<ConfigValue>> {
        match *entry {
            Entry::Json { file, required, .. } => {
                let path = base.join(file);
                match self.read_file(&path, required)? {
                    Some(bytes) => parse_json(&bytes, &self.full_path(&path)).map(Some),
                    None => Ok(None),
                }
            }
            Entry::Verbatim { file, required, .. } => {
                let path = base.join(file);
                match self.read_file(&path, required)? {
                    Some(bytes) => self.decode_text(bytes, &path).map(|s| Some(s.into())),
                    None => Ok(None),
                }
            }
            Entry::VerbatimTree { .. } => self.read_verbatim_tree(base, layout).map(Some),
            Entry::Instances {
                dir, naming, layout: inner, ..
            } => self.read_instances(base, dir, naming, inner, layout),
            Entry::EntryFiles {
                dir,
                naming,
                container,
                ..
            } => self.read_entry_files(&base.join(dir), naming, container),
        }
    }

    fn read_file(&self, path: &Path, required: bool) -> Result<Option<Vec<u8>>> {
        match self.storage.read(path)? {
            Some(bytes) => Ok(Some(bytes)),
            None if required => Err(CodecError::MissingFile {
                path: self.full_path(path),
            }),
            None => Ok(None),
        }
    }

    fn decode_text(&self, bytes: Vec<u8>, path: &Path) -> Result<String> {
        String::from_utf8(bytes).map_err(|e| CodecError::Parse {
            path: self.full_path(path),
            offset: e.utf8_error().valid_up_to(),
            message: "source file is not valid UTF-8".to_string(),
        })
    }

    fn read_verbatim_tree(&self, base: &Path, layout: &Layout) -> Result<ConfigValue> {
        let reserved = layout.reserved_names();
        let mut sources = ConfigMap::new();

        for relative in self.storage.walk_files(base)? {
            let components: Vec<&str> = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect();
            if components.iter().any(|c| is_hidden(c)) {
                continue;
            }
            if components
                .first()
                .is_some_and(|first| reserved.iter().any(|r| r == first))
            {
                continue;
            }

            let path = base.join(&relative);
            let Some(bytes) = self.storage.read(&path)? else {
                continue;
            };
            let text = self.decode_text(bytes, &path)?;
            sources.insert(components.join("/"), text.into());
        }

        Ok(ConfigValue::Object(sources))
    }

    fn read_instances(
        &self,
        base: &Path,
        dir: &str,
        naming: Naming,
        layout: &Layout,
        parent: &Layout,
    ) -> Result<Option<ConfigValue>> {
        let instances_base = base.join(dir);
        if !self.storage.is_dir(&instances_base) {
            return Ok(None);
        }

        let reserved = if dir.is_empty() {
            parent.reserved_names()
        } else {
            Vec::new()
        };

        let mut found = Vec::new();
        self.discover(&instances_base, naming.depth(), &reserved, Vec::new(), &mut found)?;

        let mut items = Vec::with_capacity(found.len());
        for names in found {
            self.cancel.check()?;
            let instance_dir = names.iter().fold(instances_base.clone(), |p, n| p.join(n));
            let mut item = self.read_layout(&instance_dir, layout)?;
            fill_identity(&mut item, naming.primary(), &names, &instance_dir);
            items.push(item);
        }

        Ok(Some(ConfigValue::Array(items)))
    }

    /// Collects instance directories `depth` levels below `dir`, in
    /// lexicographic order level by level.
    fn discover(
        &self,
        dir: &Path,
        depth: usize,
        reserved: &[&str],
        prefix: Vec<String>,
        found: &mut Vec<Vec<String>>,
    ) -> Result<()> {
        for entry in self.storage.list_dir(dir)? {
            if !entry.is_dir || is_hidden(&entry.name) || reserved.iter().any(|r| *r == entry.name) {
                continue;
            }
            let mut names = prefix.clone();
            names.push(entry.name.clone());
            if depth <= 1 {
                found.push(names);
            } else {
                self.discover(&dir.join(&entry.name), depth - 1, &[], names, found)?;
            }
        }
        Ok(())
    }

    fn read_entry_files(
        &self,
        dir: &Path,
        naming: Naming,
        container: Container,
    ) -> Result<Option<ConfigValue>> {
        if !self.storage.is_dir(dir) {
            return Ok(None);
        }

        let mut items = Vec::new();
        let mut keyed = ConfigMap::new();

        for entry in self.storage.list_dir(dir)? {
            if entry.is_dir || is_hidden(&entry.name) {
                continue;
            }
            let Some(stem) = entry.name.strip_suffix(JSON_EXT) else {
                continue;
            };

            self.cancel.check()?;
            let path = dir.join(&entry.name);
            let Some(bytes) = self.storage.read(&path)? else {
                continue;
            };
            let mut value = parse_json(&bytes, &self.full_path(&path))?;

            match container {
                Container::Array => {
                    if naming.primary().len() == 1 {
                        fill_identity(&mut value, naming.primary(), &[stem.to_string()], &path);
                    }
                    items.push(value);
                }
                Container::Object => {
                    let key = instance_name(&value, naming).unwrap_or_else(|| stem.to_string());
                    keyed.insert(key, value);
                }
            }
        }

        Ok(Some(match container {
            Container::Array => ConfigValue::Array(items),
            Container::Object => ConfigValue::Object(keyed),
        }))
    }
}

/// Resolves an instance's name from its value using the first usable candidate.
pub(crate) fn instance_name_parts(value: &ConfigValue, naming: Naming) -> Option<Vec<String>> {
    naming.candidates.iter().find_map(|candidate| {
        candidate
            .iter()
            .map(|path| match value.pointer(path)? {
                ConfigValue::String(s) => Some(s.clone()),
                ConfigValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect::<Option<Vec<String>>>()
    })
}

fn instance_name(value: &ConfigValue, naming: Naming) -> Option<String> {
    instance_name_parts(value, naming).map(|parts| parts.join("."))
}

/// Puts identifying fields missing from a legacy file back from the names
/// it was discovered under. Values already present always win.
fn fill_identity(value: &mut ConfigValue, keys: &[&str], names: &[String], location: &Path) {
    for (dotted, name) in keys.iter().zip(names) {
        let (parents, leaf) = match dotted.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, *dotted),
        };

        let target = match parents {
            Some(parents) => parents
                .split('.')
                .try_fold(&mut *value, |current, key| current.as_object_mut()?.get_mut(key)),
            None => Some(&mut *value),
        };
        let Some(map) = target.and_then(ConfigValue::as_object_mut) else {
            continue;
        };

        if let Some(existing) = map.get(leaf) {
            if let Some(existing) = existing.as_str().filter(|e| *e != name.as_str()) {
                log::debug!(
                    "'{}' in {} is '{}' but the entry is stored as '{}', keeping '{}'",
                    dotted,
                    location.display(),
                    existing,
                    name,
                    existing
                );
            }
            continue;
        }
        map.insert(leaf.to_string(), ConfigValue::String(name.clone()));
    }
}

fn entry_path(base: &Path, entry: &Entry) -> PathBuf {
    match entry.own_name() {
        Some(name) => base.join(name),
        None => base.to_path_buf(),
    }
}

fn empty_for(entry: &Entry) -> ConfigValue {
    match entry {
        Entry::Instances { .. } => ConfigValue::Array(Vec::new()),
        Entry::EntryFiles {
            container: Container::Array,
            ..
        } => ConfigValue::Array(Vec::new()),
        Entry::EntryFiles { .. } | Entry::VerbatimTree { .. } => ConfigValue::object(),
        Entry::Json { .. } | Entry::Verbatim { .. } => ConfigValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::schema::describe;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn read(storage: &MemoryStorage, section: &str, version: StructuralVersion) -> Result<Option<ConfigValue>> {
        let descriptor = describe(section, version).unwrap();
        read_section(storage, descriptor, version, &CancelFlag::new())
    }

    fn v2(storage: &MemoryStorage, section: &str) -> ConfigValue {
        read(storage, section, StructuralVersion::V2).unwrap().unwrap()
    }

    #[test]
    fn test_absent_section_is_none() {
        let storage = MemoryStorage::new();
        assert!(read(&storage, "sync", StructuralVersion::V2).unwrap().is_none());
        assert!(read(&storage, "app", StructuralVersion::V2).unwrap().is_none());
    }

    #[test]
    fn test_functions_with_nested_sources() {
        let storage = MemoryStorage::new();
        storage.insert("functions/config.json", r#"[{"name": "bar", "private": true}]"#);
        storage.insert("functions/eggcorn.js", "exports = function () {\n  console.log('eggcorn');\n};\n");
        storage.insert("functions/foo/bar.js", "exports = function () {\n  console.log('foobar');\n};\n");
        storage.insert("functions/.DS_Store", "junk");

        assert_eq!(
            v2(&storage, "functions"),
            ConfigValue::from(json!({
                "configs": [{"name": "bar", "private": true}],
                "sources": {
                    "eggcorn.js": "exports = function () {\n  console.log('eggcorn');\n};\n",
                    "foo/bar.js": "exports = function () {\n  console.log('foobar');\n};\n",
                }
            }))
        );
    }

    #[test]
    fn test_verbatim_has_no_newline_normalization() {
        let storage = MemoryStorage::new();
        storage.insert("functions/config.json", "[]");
        storage.insert("functions/crlf.js", "a\r\nb  \r\n\r\n");
        storage.insert("functions/bare.js", "no newline");

        let value = v2(&storage, "functions");
        let sources = value.get("sources").unwrap();
        assert_eq!(sources.get("crlf.js").unwrap().as_str(), Some("a\r\nb  \r\n\r\n"));
        assert_eq!(sources.get("bare.js").unwrap().as_str(), Some("no newline"));
    }

    #[test]
    fn test_data_sources_with_split_rules() {
        let storage = MemoryStorage::new();
        let root = "data_sources/mongodb-atlas";
        storage.insert(
            format!("{}/config.json", root),
            r#"{"name": "mongodb-atlas", "type": "mongodb-atlas", "config": {}}"#,
        );
        storage.insert(format!("{}/foo/bar/rules.json", root), r#"{"database": "foo", "collection": "bar"}"#);
        storage.insert(format!("{}/foo/bar/schema.json", root), r#"{"title": "foo.bar schema"}"#);
        storage.insert(format!("{}/foo/bar/relationships.json", root), "{}");
        storage.insert(format!("{}/test/test/rules.json", root), r#"{"database": "test", "collection": "test"}"#);
        storage.insert(format!("{}/test/test/schema.json", root), r#"{"title": "test.test schema"}"#);

        assert_eq!(
            v2(&storage, "data_sources"),
            ConfigValue::from(json!([{
                "config": {"type": "mongodb-atlas", "name": "mongodb-atlas", "config": {}},
                "rules": [
                    {
                        "database": "foo",
                        "collection": "bar",
                        "schema": {"title": "foo.bar schema"},
                        "relationships": {}
                    },
                    {
                        "database": "test",
                        "collection": "test",
                        "schema": {"title": "test.test schema"}
                    }
                ]
            }]))
        );
    }

    #[test]
    fn test_multi_instances_are_sorted() {
        let storage = MemoryStorage::new();
        for name in ["b", "a", "c"] {
            storage.insert(format!("values/{}.json", name), format!(r#"{{"name": "{}"}}"#, name));
        }
        let names: Vec<String> = v2(&storage, "values")
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.get("name").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_config_name_wins_over_directory_name() {
        let storage = MemoryStorage::new();
        storage.insert("data_sources/renamed/config.json", r#"{"name": "original", "type": "mongodb-atlas"}"#);
        let value = v2(&storage, "data_sources");
        assert_eq!(
            value.as_array().unwrap()[0].pointer("config.name").unwrap().as_str(),
            Some("original")
        );
    }

    #[test]
    fn test_missing_identity_filled_from_directories() {
        let storage = MemoryStorage::new();
        storage.insert("data_sources/atlas/config.json", r#"{"type": "mongodb-atlas"}"#);
        storage.insert("data_sources/atlas/db/coll/rules.json", r#"{"roles": []}"#);

        let value = v2(&storage, "data_sources");
        let source = &value.as_array().unwrap()[0];
        assert_eq!(source.pointer("config.name").unwrap().as_str(), Some("atlas"));
        let rule = &source.get("rules").unwrap().as_array().unwrap()[0];
        assert_eq!(rule.get("database").unwrap().as_str(), Some("db"));
        assert_eq!(rule.get("collection").unwrap().as_str(), Some("coll"));
    }

    #[test]
    fn test_missing_required_file() {
        let storage = MemoryStorage::new();
        storage.insert("data_sources/atlas/foo/bar/schema.json", "{}");
        storage.insert("data_sources/atlas/config.json", r#"{"name": "atlas"}"#);

        match read(&storage, "data_sources", StructuralVersion::V2) {
            Err(CodecError::MissingFile { path }) => {
                assert_eq!(path, PathBuf::from("data_sources/atlas/foo/bar/rules.json"))
            }
            other => panic!("expected missing file, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_optional_file_is_absent() {
        let storage = MemoryStorage::new();
        storage.insert("auth/providers.json", "{}");
        assert_eq!(v2(&storage, "auth"), ConfigValue::from(json!({"providers": {}})));
    }

    #[test]
    fn test_malformed_file_aborts_section() {
        let storage = MemoryStorage::new();
        storage.insert("values/a.json", r#"{"name": "a"}"#);
        storage.insert("values/b.json", r#"{"name": "#);

        match read(&storage, "values", StructuralVersion::V2) {
            Err(CodecError::Parse { path, .. }) => assert_eq!(path, PathBuf::from("values/b.json")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_source() {
        let storage = MemoryStorage::new();
        storage.insert("functions/config.json", "[]");
        storage.insert("functions/bad.js", vec![b'o', b'k', 0xff, 0xfe]);

        match read(&storage, "functions", StructuralVersion::V2) {
            Err(CodecError::Parse { path, offset, .. }) => {
                assert_eq!(path, PathBuf::from("functions/bad.js"));
                assert_eq!(offset, 2);
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_http_endpoint_with_webhooks_and_rules() {
        let storage = MemoryStorage::new();
        storage.insert("http_endpoints/http/config.json", r#"{"name": "http", "type": "http", "version": 1}"#);
        storage.insert(
            "http_endpoints/http/incoming_webhooks/find/config.json",
            r#"{"name": "find", "respond_result": true}"#,
        );
        storage.insert("http_endpoints/http/incoming_webhooks/find/source.js", "exports = () => 1;");
        storage.insert("http_endpoints/http/rules/rule.json", r#"{"name": "rule", "actions": ["get"]}"#);

        assert_eq!(
            v2(&storage, "http_endpoints"),
            ConfigValue::from(json!([{
                "config": {"name": "http", "type": "http", "version": 1},
                "incoming_webhooks": [{"name": "find", "respond_result": true, "source": "exports = () => 1;"}],
                "rules": [{"name": "rule", "actions": ["get"]}]
            }]))
        );
    }

    #[test]
    fn test_v1_services_combined_rules() {
        let storage = MemoryStorage::new();
        storage.insert("services/mongodb-atlas/config.json", r#"{"name": "mongodb-atlas"}"#);
        storage.insert(
            "services/mongodb-atlas/rules/foo.bar.json",
            r#"{"database": "foo", "collection": "bar", "schema": {"title": "t"}}"#,
        );

        let value = read(&storage, "services", StructuralVersion::V1).unwrap().unwrap();
        assert_eq!(
            value,
            ConfigValue::from(json!([{
                "config": {"name": "mongodb-atlas"},
                "rules": [{"database": "foo", "collection": "bar", "schema": {"title": "t"}}]
            }]))
        );
    }

    #[test]
    fn test_v1_auth_providers_keyed_by_name() {
        let storage = MemoryStorage::new();
        storage.insert("auth_providers/api-key.json", r#"{"name": "api-key", "type": "api-key"}"#);
        storage.insert("auth_providers/README.md", "ignored");

        let value = read(&storage, "auth", StructuralVersion::V1).unwrap().unwrap();
        assert_eq!(
            value,
            ConfigValue::from(json!({"providers": {"api-key": {"name": "api-key", "type": "api-key"}}}))
        );
    }

    #[test]
    fn test_cancelled_before_instance() {
        let storage = MemoryStorage::new();
        storage.insert("data_sources/a/config.json", r#"{"name": "a"}"#);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let descriptor = describe("data_sources", StructuralVersion::V2).unwrap();
        let result = read_section(&storage, descriptor, StructuralVersion::V2, &cancel);
        assert!(matches!(result, Err(CodecError::Cancelled)));
    }
}
