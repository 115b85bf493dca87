//! Shared helpers for exporter integration tests.

#![allow(dead_code)]

use serde_json::Value;
use tempfile::TempDir;
use tms_models::{validate_export, ExportReader, ExportWriter, Root, TestCase};
use wiremock::{Match, Request, ResponseTemplate};

/// Matches TestRail's `index.php?/api/v2/...` style requests by their full query.
pub struct TestRailQuery(pub String);

impl Match for TestRailQuery {
    fn matches(&self, request: &Request) -> bool {
        request.url.path() == "/index.php" && request.url.query() == Some(self.0.as_str())
    }
}

pub fn testrail(query: &str) -> TestRailQuery {
    TestRailQuery(format!("/api/v2/{query}"))
}

pub fn json(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

pub fn bytes(body: &[u8]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_bytes(body.to_vec())
}

/// A fresh export directory and its writer.
pub fn output() -> (TempDir, ExportWriter) {
    let dir = TempDir::new().unwrap();
    let writer = ExportWriter::create(dir.path()).unwrap();
    (dir, writer)
}

/// Reads the export back and asserts it passes validation.
pub fn read_valid(dir: &TempDir) -> (ExportReader, Root) {
    let reader = ExportReader::open(dir.path()).unwrap();
    let report = validate_export(&reader).unwrap();
    assert!(
        report.is_valid(),
        "export should validate: {:?}",
        report.errors().collect::<Vec<_>>()
    );
    let root = reader.read_root().unwrap();
    (reader, root)
}

pub fn test_cases(reader: &ExportReader, root: &Root) -> Vec<TestCase> {
    root.test_cases
        .iter()
        .map(|id| reader.read_test_case(*id).unwrap())
        .collect()
}
