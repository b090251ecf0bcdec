//! CLI test cases.
//!
//! Tests which need Tesseract, Poppler or network access are marked as
//! `#[ignore]`. Run them with `cargo test -- --ignored` on a machine that has
//! everything installed.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// A two page PDF with a text layer.
static TWO_PAGE_PDF: &str = "tests/fixtures/two_pages.pdf";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("abhidhamma-translator").unwrap();
    // Don't let a developer's `.env` or shell point us at a real server.
    cmd.env_remove("TRANSLATE_API_BASE");
    cmd
}

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("TRANSLATE_API_BASE"));
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_translate_help_lists_options() {
    cmd()
        .args(["translate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--max-pages"))
        .stdout(predicate::str::contains("--all-pages"))
        .stdout(predicate::str::contains("--chunk-size"))
        .stdout(predicate::str::contains("--rate-limit"))
        .stdout(predicate::str::contains("--ocr-engine"));
}

#[test]
fn test_schema_document_result() {
    cmd()
        .args(["schema", "DocumentResult"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"all_pali_terms\""))
        .stdout(predicate::str::contains("\"incomplete\""));
}

#[test]
fn test_schema_pali_term_config() {
    cmd()
        .args(["schema", "PaliTermConfig"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"replace_defaults\""));
}

#[test]
fn test_translate_without_documents_fails() {
    let dir = tempfile::TempDir::with_prefix("cli-empty").unwrap();
    cmd()
        .arg("translate")
        .arg("--input-dir")
        .arg(dir.path())
        .args(["--translator", "echo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no documents to translate"));
}

#[test]
fn test_max_pages_conflicts_with_all_pages() {
    cmd()
        .args(["translate", "--max-pages", "2", "--all-pages", "x.pdf"])
        .assert()
        .failure();
}

#[test]
fn test_zero_chunk_size_is_rejected() {
    cmd()
        .args(["translate", "--chunk-size", "0", "x.pdf"])
        .assert()
        .failure();
}

#[test]
fn test_missing_document_fails_without_output() {
    let dir = tempfile::TempDir::with_prefix("cli-missing").unwrap();
    let out = dir.path().join("out");
    cmd()
        .arg("translate")
        .arg(dir.path().join("missing.pdf"))
        .arg("-o")
        .arg(&out)
        .args(["--translator", "echo", "--ocr-engine", "pdftotext"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.pdf"));
    assert!(!out.join("missing_translation.json").exists());
}

#[test]
#[ignore = "Needs poppler-utils installed"]
fn test_translate_pdf_with_text_layer() {
    let dir = tempfile::TempDir::with_prefix("cli-translate").unwrap();
    let out = dir.path().join("translations");
    cmd()
        .arg("translate")
        .arg(TWO_PAGE_PDF)
        .arg("-o")
        .arg(&out)
        .args(["--translator", "echo", "--ocr-engine", "pdftotext"])
        .args(["--rate-limit", "100/s", "--jobs", "2"])
        .assert()
        .success();

    let json = std::fs::read_to_string(out.join("two_pages_translation.json")).unwrap();
    assert!(json.contains("\"processed_pages\": 2"));
    assert!(json.contains("\"citta\""));
    let english = std::fs::read_to_string(out.join("two_pages_english.txt")).unwrap();
    assert!(english.contains("[Page 1]\ncitta and cetasika"));
    assert!(english.contains("[Page 2]\nrupa and nibbana"));
    assert!(out.join("two_pages_translation.txt").exists());
}

#[test]
#[ignore = "Needs poppler-utils and tesseract with Thai language data"]
fn test_translate_pdf_with_tesseract() {
    let dir = tempfile::TempDir::with_prefix("cli-tesseract").unwrap();
    cmd()
        .arg("translate")
        .arg(TWO_PAGE_PDF)
        .arg("-o")
        .arg(dir.path())
        .args(["--translator", "echo", "--max-pages", "1"])
        .assert()
        .success();
    let json =
        std::fs::read_to_string(dir.path().join("two_pages_translation.json")).unwrap();
    assert!(json.contains("\"processed_pages\": 1"));
}

#[test]
#[ignore = "Needs tesseract, poppler-utils and network access"]
fn test_check() {
    cmd().arg("check").assert().success();
}
