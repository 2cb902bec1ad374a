//! The global subscriber can only be installed once per process, so these
//! tests run serially in their own binary.

mod common;

use std::io;
use std::sync::{Arc, Mutex};

use serde_json::json;
use serial_test::serial;

use apptree::logging::{init_with_writer, LogFormat};
use apptree::{AppDocument, StructuralVersion};

use common::TestHarness;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn install() -> SharedBuffer {
    static BUFFER: Mutex<Option<SharedBuffer>> = Mutex::new(None);
    let mut slot = BUFFER.lock().unwrap();
    if let Some(buffer) = slot.as_ref() {
        return buffer.clone();
    }
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    init_with_writer(LogFormat::Json, move || writer.clone()).unwrap();
    *slot = Some(buffer.clone());
    buffer
}

#[test]
#[serial]
fn test_log_records_reach_the_subscriber() {
    let buffer = install();
    let harness = TestHarness::new();
    let mut document = AppDocument::new();
    document.insert("values", json!([{"name": "logged"}]).into());

    harness.encode(&document, StructuralVersion::V2).unwrap();

    let output = buffer.contents();
    assert!(output.contains("Encoding 1 sections"), "output was: {}", output);
    assert!(output.contains("codec.encode"), "span missing from: {}", output);
    assert!(
        !output.contains(harness.temp_path().to_string_lossy().as_ref()),
        "absolute paths leaked into: {}",
        output
    );
}

#[test]
#[serial]
fn test_second_init_fails() {
    install();
    assert!(init_with_writer(LogFormat::Plain, io::sink).is_err());
}
