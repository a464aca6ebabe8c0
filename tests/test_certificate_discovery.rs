//! Cross-store discovery: fault isolation, classification, de-duplication,
//! and fingerprint resolution.

use signet::catalog::CertificateFilter;
use signet::{SignatureService, SigningConfig, SourceKind};
use std::fs;
use std::path::{Path, PathBuf};

const SIGNING_CERT: &[u8] = include_bytes!("fixtures/signing_cert.der");
const SIGNING_KEY: &[u8] = include_bytes!("fixtures/signing_key.der");
const ENCIPHER_CERT: &[u8] = include_bytes!("fixtures/encipher_cert.der");
const ENCIPHER_KEY: &[u8] = include_bytes!("fixtures/encipher_key.der");

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_bundle(dir: &Path, name: &str, cert: &[u8], key: &[u8], password: &str) {
    let pfx = p12::PFX::new(cert, key, None, password, "test").unwrap();
    fs::write(dir.join(name), pfx.to_der()).unwrap();
}

fn service_over(dir: &Path) -> SignatureService {
    let config = SigningConfig {
        certificate_dirs: vec![dir.to_path_buf()],
        // A dead module path must not poison the listing.
        token_modules: vec![PathBuf::from("/nonexistent/pkcs11-module.so")],
        browser_db_dir: None,
        browser_modules: Vec::new(),
        profile_dir: dir.join("profiles"),
    };
    SignatureService::new(&config)
}

#[test]
fn test_listing_is_isolated_from_broken_backends() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), "ana.p12", SIGNING_CERT, SIGNING_KEY, "");
    write_bundle(dir.path(), "cipher.p12", ENCIPHER_CERT, ENCIPHER_KEY, "");

    let service = service_over(dir.path());
    let certs = service.list_certificates(&CertificateFilter::default());

    // The dead token module and the absent browser database are skipped;
    // both bundles are still found.
    assert_eq!(certs.len(), 2);
    assert!(certs.iter().all(|c| c.source == SourceKind::FileBundle));
}

#[test]
fn test_locked_bundles_are_reported_not_unlocked() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), "locked.p12", SIGNING_CERT, SIGNING_KEY, "secret");

    let service = service_over(dir.path());
    let certs = service.list_certificates(&CertificateFilter::default());
    assert_eq!(certs.len(), 1);
    assert!(certs[0].requires_credential);
    assert_eq!(certs[0].name, "locked");
    // Optimistic until the password proves otherwise.
    assert!(certs[0].is_valid);
}

#[test]
fn test_corrupt_files_are_skipped_silently() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("junk.p12"), b"definitely not a container").unwrap();
    write_bundle(dir.path(), "ana.p12", SIGNING_CERT, SIGNING_KEY, "");

    let service = service_over(dir.path());
    assert_eq!(service.list_certificates(&CertificateFilter::default()).len(), 1);
}

#[test]
fn test_duplicate_fingerprints_fold_and_resolution_reports_ambiguity() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    // The same physical certificate behind two bundle files.
    write_bundle(dir.path(), "a.p12", SIGNING_CERT, SIGNING_KEY, "");
    write_bundle(dir.path(), "b.p12", SIGNING_CERT, SIGNING_KEY, "");

    let service = service_over(dir.path());
    let certs = service.list_certificates(&CertificateFilter::default());
    assert_eq!(certs.len(), 1, "one identity, not two entries");
    assert_eq!(certs[0].fingerprint, signet::fingerprint(SIGNING_CERT));
}

#[test]
fn test_search_matches_subject_fields() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), "ana.p12", SIGNING_CERT, SIGNING_KEY, "");
    write_bundle(dir.path(), "cipher.p12", ENCIPHER_CERT, ENCIPHER_KEY, "");

    let service = service_over(dir.path());
    let hits = service.search_certificates("ana torres");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Ana Torres");

    assert!(service.search_certificates("nobody at all").is_empty());
}

#[test]
fn test_filter_by_key_usage() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), "ana.p12", SIGNING_CERT, SIGNING_KEY, "");
    write_bundle(dir.path(), "cipher.p12", ENCIPHER_CERT, ENCIPHER_KEY, "");

    let service = service_over(dir.path());
    let filter = CertificateFilter {
        required_key_usage: Some("Digital Signature".to_string()),
        ..CertificateFilter::default()
    };
    let hits = service.list_certificates(&filter);
    assert_eq!(hits.len(), 1);
    assert!(hits[0].can_sign());
}
