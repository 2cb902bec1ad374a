//! Failure handling: no rollback, precise error locations, best-effort mode.

mod common;

use serde_json::json;

use apptree::{AppDocument, CancelFlag, CodecError, StructuralVersion};

use common::TestHarness;

fn five_sources(third: serde_json::Value) -> AppDocument {
    let mut sources = vec![
        json!({"config": {"name": "alpha", "type": "mongodb-atlas"}, "rules": []}),
        json!({"config": {"name": "beta", "type": "mongodb-atlas"}, "rules": []}),
    ];
    sources.push(third);
    sources.push(json!({"config": {"name": "delta", "type": "mongodb-atlas"}, "rules": []}));
    sources.push(json!({"config": {"name": "epsilon", "type": "mongodb-atlas"}, "rules": []}));

    let mut document = AppDocument::new();
    document.insert("data_sources", json!(sources).into());
    document
}

#[test]
fn test_third_of_five_unsanitizable_name() {
    let harness = TestHarness::new();
    let document = five_sources(json!({"config": {"name": "", "type": "mongodb-atlas"}, "rules": []}));

    let error = harness.encode(&document, StructuralVersion::V2).unwrap_err();
    assert_eq!(error.section(), Some("data_sources"));
    assert_eq!(error.instance(), Some(2));
    assert!(error.to_string().contains("Item #3"), "message was: {}", error);
    match error.root_cause() {
        CodecError::InvalidName { name, path } => {
            assert_eq!(name, "");
            assert_eq!(path, &harness.root.join("data_sources"));
        }
        other => panic!("expected invalid name, got {:?}", other),
    }

    assert!(harness.exists("data_sources/alpha/config.json"));
    assert!(harness.exists("data_sources/beta/config.json"));
    assert!(!harness.exists("data_sources/delta"));
    assert!(!harness.exists("data_sources/epsilon"));
}

#[test]
fn test_third_of_five_malformed_body() {
    let harness = TestHarness::new();
    let document = five_sources(json!({"config": {"name": "gamma"}, "rules": "not a list"}));

    let error = harness.encode(&document, StructuralVersion::V2).unwrap_err();
    assert_eq!(error.instance(), Some(2));
    match error.root_cause() {
        CodecError::MalformedValue { path, .. } => {
            assert_eq!(path, &harness.root.join("data_sources").join("gamma"));
        }
        other => panic!("expected malformed value, got {:?}", other),
    }
    assert_eq!(error.path(), Some(harness.root.join("data_sources/gamma").as_path()));

    assert!(harness.exists("data_sources/alpha/config.json"));
    assert!(harness.exists("data_sources/beta/config.json"));
    assert!(!harness.exists("data_sources/delta"));
}

#[test]
fn test_name_collision_after_sanitizing() {
    let harness = TestHarness::new();
    let mut document = AppDocument::new();
    document.insert(
        "data_sources",
        json!([
            {"config": {"name": "team/a"}, "rules": []},
            {"config": {"name": "team:a"}, "rules": []}
        ])
        .into(),
    );

    let error = harness.encode(&document, StructuralVersion::V2).unwrap_err();
    assert_eq!(error.instance(), Some(1));
    match error.root_cause() {
        CodecError::NameCollision { name, path } => {
            assert_eq!(name, "team_a");
            assert_eq!(path, &harness.root.join("data_sources").join("team_a"));
        }
        other => panic!("expected collision, got {:?}", other),
    }
    assert!(harness.exists("data_sources/team_a/config.json"));
}

#[test]
fn test_missing_rules_fail_instead_of_reading_back_empty() {
    let harness = TestHarness::new();
    let document = five_sources(json!({"config": {"name": "gamma", "type": "mongodb-atlas"}}));

    let error = harness.encode(&document, StructuralVersion::V2).unwrap_err();
    assert_eq!(error.instance(), Some(2));
    match error.root_cause() {
        CodecError::MalformedValue { path, message } => {
            assert_eq!(path, &harness.root.join("data_sources").join("gamma"));
            assert_eq!(message, "missing field 'rules'");
        }
        other => panic!("expected malformed value, got {:?}", other),
    }
    assert!(!harness.exists("data_sources/gamma/config.json"));
}

#[test]
fn test_best_effort_encodes_remaining_sections() {
    let harness = TestHarness::new();
    let mut document = AppDocument::new();
    document.insert("sync", json!({"config": {"development_mode_enabled": true}}).into());
    document.insert("data_sources", json!([{"config": {}}]).into());
    document.insert("values", json!([{"name": "kept"}]).into());
    document.insert("hosting", json!({}).into());

    let report = harness
        .codec_with(|o| o.with_best_effort(true))
        .encode_all(&document, StructuralVersion::V2, &CancelFlag::new())
        .unwrap();

    let failed: Vec<&str> = report.failures.iter().map(|f| f.section.as_str()).collect();
    assert_eq!(failed, vec!["hosting", "data_sources"]);
    assert!(harness.exists("sync/config.json"));
    assert!(harness.exists("values/kept.json"));
}

#[test]
fn test_malformed_file_names_its_path() {
    let harness = TestHarness::new();
    harness.write_file("realm_config.json", r#"{"name": "app"}"#);
    harness.write_file("http_endpoints/http/config.json", r#"{"name": "http"}"#);
    harness.write_file("http_endpoints/http/rules/broken.json", "{\n  \"name\": \"broken\",\n  oops\n}");

    let error = harness.decode().unwrap_err();
    assert_eq!(error.section(), Some("http_endpoints"));
    match error.root_cause() {
        CodecError::Parse { path, offset, .. } => {
            assert_eq!(path, &harness.root.join("http_endpoints/http/rules/broken.json"));
            // Third line starts at byte 22; the stray token is two bytes in.
            assert!((22..=24).contains(offset), "offset {}", offset);
        }
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_missing_required_file_names_its_path() {
    let harness = TestHarness::new();
    harness.write_file("auth/custom_user_data.json", "{}");

    let error = harness.decode().unwrap_err();
    assert_eq!(error.path(), Some(harness.root.join("auth/providers.json").as_path()));
    assert!(matches!(error.root_cause(), CodecError::MissingFile { .. }));
}

#[test]
fn test_cancel_stops_before_next_instance() {
    let harness = TestHarness::new();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let result = harness
        .codec()
        .encode_all(&five_sources(json!({"config": {"name": "gamma"}})), StructuralVersion::V2, &cancel);
    assert!(matches!(result, Err(CodecError::Cancelled)));
    assert!(!harness.exists("data_sources/alpha"));
}
