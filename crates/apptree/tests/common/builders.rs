//! Builders for creating test documents programmatically.

#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::json;

use apptree::codec::{
    AuthStructure, DataSourceStructure, FunctionsStructure, HttpEndpointStructure, Structure,
    SyncStructure,
};
use apptree::{AppDocument, ConfigMap, ConfigValue, StructuralVersion};

/// Converts a `json!` object into a `ConfigMap`.
pub fn map(value: serde_json::Value) -> ConfigMap {
    match ConfigValue::from(value) {
        ConfigValue::Object(map) => map,
        other => panic!("Expected an object, got {}", other),
    }
}

/// Builder for creating `AppDocument` instances in the expanded layout.
pub struct DocumentBuilder {
    document: AppDocument,
    functions: Option<FunctionsStructure>,
    data_sources: Vec<DataSourceStructure>,
    http_endpoints: Vec<HttpEndpointStructure>,
    values: Vec<ConfigValue>,
}

impl DocumentBuilder {
    /// A document with just an app config declaring the given version.
    pub fn new(name: &str, version: StructuralVersion) -> Self {
        let mut document = AppDocument::new();
        document.insert(
            "app",
            json!({"name": name, "config_version": version.id(), "location": "US-VA"}).into(),
        );
        Self {
            document,
            functions: None,
            data_sources: Vec::new(),
            http_endpoints: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn function(mut self, name: &str, path: &str, source: &str) -> Self {
        let functions = self.functions.get_or_insert_with(FunctionsStructure::default);
        functions.configs.push(map(json!({"name": name, "private": false})));
        functions.sources.insert(path.to_string(), source.to_string());
        self
    }

    pub fn data_source(mut self, source: DataSourceStructure) -> Self {
        self.data_sources.push(source);
        self
    }

    pub fn http_endpoint(mut self, endpoint: HttpEndpointStructure) -> Self {
        self.http_endpoints.push(endpoint);
        self
    }

    pub fn value(mut self, name: &str, value: serde_json::Value) -> Self {
        self.values.push(json!({"name": name, "value": value}).into());
        self
    }

    pub fn auth(mut self, auth: AuthStructure) -> Self {
        self.document.insert("auth", auth.to_value().expect("auth"));
        self
    }

    pub fn sync(mut self, sync: SyncStructure) -> Self {
        self.document.insert("sync", sync.to_value().expect("sync"));
        self
    }

    pub fn section(mut self, name: &str, value: serde_json::Value) -> Self {
        self.document.insert(name, value.into());
        self
    }

    pub fn build(mut self) -> AppDocument {
        if let Some(functions) = self.functions {
            self.document.insert("functions", functions.to_value().expect("functions"));
        }
        if !self.data_sources.is_empty() {
            self.document
                .insert("data_sources", self.data_sources.to_value().expect("data sources"));
        }
        if !self.http_endpoints.is_empty() {
            self.document.insert(
                "http_endpoints",
                self.http_endpoints.to_value().expect("http endpoints"),
            );
        }
        if !self.values.is_empty() {
            self.document.insert("values", ConfigValue::Array(self.values));
        }
        self.document
    }
}

/// A data source with the given collection rules, each with a schema.
pub fn atlas_source(name: &str, namespaces: &[(&str, &str)]) -> DataSourceStructure {
    DataSourceStructure {
        config: map(json!({
            "name": name,
            "type": "mongodb-atlas",
            "config": {"clusterName": "Cluster0", "wireProtocolEnabled": true}
        })),
        default_rule: None,
        rules: namespaces
            .iter()
            .map(|(database, collection)| {
                map(json!({
                    "database": database,
                    "collection": collection,
                    "roles": [{"name": "owner", "apply_when": {}, "insert": true}],
                    "schema": {"title": format!("{}.{} schema", database, collection)},
                    "relationships": {}
                }))
            })
            .collect(),
    }
}

pub fn http_endpoint(name: &str, webhooks: &[(&str, &str)]) -> HttpEndpointStructure {
    HttpEndpointStructure {
        config: map(json!({"name": name, "type": "http", "config": {}})),
        incoming_webhooks: webhooks
            .iter()
            .map(|(hook, source)| {
                map(json!({
                    "name": hook,
                    "run_as_system": true,
                    "options": {"httpMethod": "GET"},
                    "source": source
                }))
            })
            .collect(),
        rules: vec![map(json!({"name": "allow-get", "actions": ["get"], "when": {}}))],
    }
}

pub fn sources(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(path, text)| (path.to_string(), text.to_string()))
        .collect()
}
