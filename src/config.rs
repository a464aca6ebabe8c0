//! Signing configuration.
//!
//! The subsystem is a read-only consumer of configuration: which
//! directories to walk for certificate bundles, which token modules to
//! probe, where the browser database lives, and where profiles are stored.
//! Nothing here is ever written back.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Configuration consumed by the signature subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SigningConfig {
    /// Directories walked for PKCS#12 bundles and certificate files.
    pub certificate_dirs: Vec<PathBuf>,
    /// PKCS#11 token module paths to probe.
    pub token_modules: Vec<PathBuf>,
    /// Browser (NSS) database directory; `None` disables the browser store.
    pub browser_db_dir: Option<PathBuf>,
    /// Soft-token module candidates for reaching the browser database.
    pub browser_modules: Vec<PathBuf>,
    /// Directory holding signature profile records.
    pub profile_dir: PathBuf,
}

impl Default for SigningConfig {
    fn default() -> Self {
        let home = home_dir();
        Self {
            certificate_dirs: home
                .as_deref()
                .map(|h| vec![h.join(".config/signet/certificates")])
                .unwrap_or_default(),
            token_modules: default_token_modules(),
            browser_db_dir: home.as_deref().map(|h| h.join(".pki/nssdb")),
            browser_modules: default_browser_modules(),
            profile_dir: home
                .as_deref()
                .map(|h| h.join(".config/signet/signature_profiles"))
                .unwrap_or_else(|| PathBuf::from("signature_profiles")),
        }
    }
}

impl SigningConfig {
    /// Load configuration from a JSON file. Fields not present fall back to
    /// the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Common locations of smart-card and token modules.
fn default_token_modules() -> Vec<PathBuf> {
    [
        "/usr/lib/x86_64-linux-gnu/opensc-pkcs11.so",
        "/usr/lib/opensc-pkcs11.so",
        "/usr/lib/pkcs11/opensc-pkcs11.so",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Common locations of the p11-kit proxy and the NSS soft token.
fn default_browser_modules() -> Vec<PathBuf> {
    [
        "/usr/lib/x86_64-linux-gnu/p11-kit-proxy.so",
        "/usr/lib/x86_64-linux-gnu/nss/libsoftokn3.so",
        "/usr/lib64/libsoftokn3.so",
        "/usr/lib/libsoftokn3.so",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = SigningConfig {
            certificate_dirs: vec![PathBuf::from("/data/certs")],
            token_modules: vec![PathBuf::from("/usr/lib/opensc-pkcs11.so")],
            browser_db_dir: None,
            browser_modules: Vec::new(),
            profile_dir: PathBuf::from("/data/profiles"),
        };
        let path = dir.path().join("config.json");
        fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();

        let loaded = SigningConfig::load(&path).unwrap();
        assert_eq!(loaded.certificate_dirs, config.certificate_dirs);
        assert_eq!(loaded.browser_db_dir, None);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = SigningConfig::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, br#"{"certificateDirs": ["/data/certs"]}"#).unwrap();

        let loaded = SigningConfig::load(&path).unwrap();
        assert_eq!(loaded.certificate_dirs, vec![PathBuf::from("/data/certs")]);
        assert!(!loaded.token_modules.is_empty());
    }
}
