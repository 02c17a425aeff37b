//! Configuration files and identity loading.

mod common;

use pdf_sealer::config::SealerConfig;
use pdf_sealer::Error;
use std::path::PathBuf;

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sealer.json");
    std::fs::write(
        &path,
        r#"{
            "store_dir": "/var/lib/sealer",
            "workers": 8,
            "store_stamped": true,
            "stamp": { "x": 120.0, "date_format": "%Y-%m-%d" },
            "signing": { "reason": "Contract approval", "signature_reserve": 12000 }
        }"#,
    )
    .unwrap();

    let config = SealerConfig::from_file(&path).unwrap();
    assert_eq!(config.store_dir, PathBuf::from("/var/lib/sealer"));
    assert_eq!(config.workers, 8);
    assert!(config.store_stamped);
    assert_eq!(config.stamp.x, 120.0);
    assert_eq!(config.stamp.date_format, "%Y-%m-%d");
    assert_eq!(config.signing.reason, "Contract approval");
    assert_eq!(config.signing.signature_reserve, 12000);
    assert_eq!(config.signing.location, "SecureSign System");
    assert_eq!(config.signed_prefix, "signed_");
    config.validate().unwrap();
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SealerConfig::from_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ workers: four }").unwrap();
    assert!(matches!(SealerConfig::from_file(&path), Err(Error::Config(_))));
}

#[test]
fn test_identity_from_pem_files() {
    let dir = tempfile::tempdir().unwrap();
    let (key_pem, cert_pem) = common::shared_identity().to_pem().unwrap();
    let key_path = dir.path().join("key.pem");
    let cert_path = dir.path().join("cert.pem");
    std::fs::write(&key_path, key_pem).unwrap();
    std::fs::write(&cert_path, cert_pem).unwrap();

    let config = SealerConfig::new().with_identity_files(&key_path, &cert_path);
    config.validate().unwrap();
    let source = config.identity_source().unwrap();
    assert!(!source.is_ephemeral());

    let first = source.identity_for("alice").unwrap();
    let second = source.identity_for("bob").unwrap();
    assert_eq!(first.subject(), common::shared_identity().subject());
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[test]
fn test_missing_pem_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = SealerConfig::new()
        .with_identity_files(dir.path().join("key.pem"), dir.path().join("cert.pem"));
    assert!(config.identity_source().is_err());
}

#[test]
fn test_env_style_overrides_on_top_of_file() {
    let config = SealerConfig::from_json(r#"{ "workers": 2 }"#)
        .unwrap()
        .with_overrides(|name| match name {
            "SEALER_WORKERS" => Some("6".to_string()),
            "SEALER_SIGNED_PREFIX" => Some("sealed-".to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.workers, 6);
    assert_eq!(config.signed_key("doc-1"), "sealed-doc-1");
}

#[test]
fn test_oversized_signature_reserve_fails_validation() {
    let config = SealerConfig::new()
        .with_overrides(|name| match name {
            "SEALER_SIGNATURE_RESERVE" => Some(usize::MAX.to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.signing.signature_reserve, usize::MAX);
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}
