//! File-bundle store: password-encrypted PKCS#12 files on disk.
//!
//! The bundle format exposes no metadata without decryption, so listing
//! works by trial-decoding each candidate with the empty password. A bundle
//! that opens empty-handed is reported with full metadata; one that fails
//! the MAC check is reported as locked (password required) with a
//! filename-derived name; anything that does not even parse is skipped as
//! corrupt. Plain certificate files (`.pem`/`.crt`/`.cer`) found in the same
//! directories are listed too, but carry no private key and cannot sign.

use log::{debug, warn};
use p12::PFX;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha2::{Sha256, Sha384, Sha512};
use signature::hazmat::PrehashSigner;
use signature::SignatureEncoding;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use super::{DigestAlgorithm, Signer};
use crate::certificate::{fingerprint, Certificate, KeyUsageFlags, SourceKind, SourceLocator};
use crate::error::{Error, Result};

/// Store over directories of PKCS#12 bundles and plain certificate files.
pub struct FileBundleStore {
    directories: Vec<PathBuf>,
}

impl FileBundleStore {
    /// Create a store over the configured certificate directories.
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    /// Enumerate certificates in every readable directory.
    ///
    /// Listing never unlocks a protected key; locked bundles are reported
    /// with `requires_credential` set.
    pub fn list(&self) -> Vec<Certificate> {
        let mut certs = Vec::new();
        for dir in &self.directories {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("skipping unreadable certificate directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
                    .unwrap_or_default();
                let listed = match ext.as_str() {
                    "p12" | "pfx" => self.probe_bundle(&path),
                    "pem" | "crt" | "cer" => self.probe_plain_certificate(&path),
                    _ => None,
                };
                if let Some(cert) = listed {
                    certs.push(cert);
                }
            }
        }
        certs
    }

    /// Trial-decode a bundle with the empty password to classify it.
    fn probe_bundle(&self, path: &Path) -> Option<Certificate> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!("skipping unreadable bundle {}: {}", path.display(), e);
                return None;
            }
        };

        let pfx = match PFX::parse(&data) {
            Ok(pfx) => pfx,
            Err(e) => {
                // Structurally invalid container, not a password problem.
                warn!("skipping corrupt bundle {}: {}", path.display(), e);
                return None;
            }
        };

        let locator = SourceLocator::FileBundle {
            path: path.to_path_buf(),
        };
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("bundle");

        if pfx.verify_mac("") {
            // The bundle opens without a password; full metadata is available.
            let cert_der = match pfx.cert_x509_bags("") {
                Ok(bags) => bags.into_iter().next(),
                Err(e) => {
                    warn!("skipping bundle {} with unreadable bags: {}", path.display(), e);
                    return None;
                }
            }?;
            match Certificate::from_der(&cert_der, SourceKind::FileBundle, locator, Some(file_name))
            {
                Ok(mut cert) => {
                    if cert.is_ca {
                        debug!("skipping CA certificate in {}", path.display());
                        return None;
                    }
                    cert.requires_credential = false;
                    cert.credential_optional = true;
                    Some(cert)
                }
                Err(e) => {
                    warn!("skipping bundle {} with invalid certificate: {}", path.display(), e);
                    None
                }
            }
        } else {
            // Valid container, wrong (empty) password: locked. Report its
            // existence optimistically; only the file name is knowable.
            let stem = path
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or("bundle");
            Some(Certificate {
                name: stem.to_string(),
                subject_dn: String::new(),
                issuer_dn: String::new(),
                serial_number: String::new(),
                valid_from: None,
                valid_to: None,
                // No DER is available without the password; the container
                // bytes are the only stable byte form to hash.
                fingerprint: fingerprint(&data),
                source: SourceKind::FileBundle,
                key_usage: KeyUsageFlags::DIGITAL_SIGNATURE,
                is_valid: true,
                is_ca: false,
                requires_credential: true,
                credential_optional: false,
                locator,
                alternate_sources: Vec::new(),
            })
        }
    }

    /// List a plain certificate file. It carries no private key, so it can
    /// never sign, but its metadata is still worth surfacing.
    fn probe_plain_certificate(&self, path: &Path) -> Option<Certificate> {
        let data = fs::read(path).ok()?;
        let der = match parse_x509_pem(&data) {
            Ok((_, pem)) => pem.contents,
            Err(_) => data, // try raw DER
        };
        let file_name = path.file_name().and_then(|n| n.to_str());
        let cert = Certificate::from_der(
            &der,
            SourceKind::FileBundle,
            SourceLocator::FileBundle {
                path: path.to_path_buf(),
            },
            file_name,
        )
        .ok()?;
        if cert.is_ca {
            debug!("skipping CA certificate {}", path.display());
            return None;
        }
        Some(cert)
    }

    /// Decode the bundle with the supplied password and wrap the private key
    /// in a software signer.
    pub fn open_signer(
        &self,
        certificate: &Certificate,
        credential: Option<&str>,
    ) -> Result<Box<dyn Signer>> {
        let path = match &certificate.locator {
            SourceLocator::FileBundle { path } => path.clone(),
            _ => return Err(Error::CertificateNotFound(certificate.fingerprint.clone())),
        };

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if ext != "p12" && ext != "pfx" {
            return Err(Error::CapabilityMismatch(format!(
                "'{}' has no private key; signing needs a PKCS#12 bundle or a token",
                path.display()
            )));
        }

        let password: Zeroizing<String> = match credential {
            Some(p) => Zeroizing::new(p.to_string()),
            None if certificate.credential_optional => Zeroizing::new(String::new()),
            None => {
                return Err(Error::BadCredential(format!(
                    "bundle '{}' requires a password",
                    path.display()
                )))
            }
        };

        let data = fs::read(&path)?;
        let pfx = PFX::parse(&data)
            .map_err(|e| Error::Structural(format!("corrupt bundle '{}': {}", path.display(), e)))?;

        if !pfx.verify_mac(&password) {
            return Err(Error::BadCredential(format!(
                "wrong password for bundle '{}'",
                path.display()
            )));
        }

        let key_der = pfx
            .key_bags(&password)
            .map_err(|e| Error::Structural(format!("unreadable key bags: {e}")))?
            .into_iter()
            .next()
            .map(Zeroizing::new)
            .ok_or_else(|| {
                Error::CapabilityMismatch(format!(
                    "no private key found in bundle '{}'",
                    path.display()
                ))
            })?;
        let cert_der = pfx
            .cert_x509_bags(&password)
            .map_err(|e| Error::Structural(format!("unreadable certificate bags: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Structural(format!("no certificate found in bundle '{}'", path.display()))
            })?;

        let file_name = path.file_name().and_then(|n| n.to_str());
        let mut cert = Certificate::from_der(
            &cert_der,
            SourceKind::FileBundle,
            certificate.locator.clone(),
            file_name,
        )?;
        cert.requires_credential = certificate.requires_credential;
        cert.credential_optional = certificate.credential_optional;

        let private_key = RsaPrivateKey::from_pkcs8_der(&key_der).map_err(|e| {
            Error::CapabilityMismatch(format!("unsupported private key type (RSA required): {e}"))
        })?;

        let public_key_der = subject_public_key_info(&cert_der)?;
        Ok(Box::new(SoftwareSigner::new(cert, cert_der, public_key_der, private_key)))
    }
}

/// Extract the raw SubjectPublicKeyInfo from a certificate.
fn subject_public_key_info(cert_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| Error::Structural(format!("X.509 parse error: {e}")))?;
    Ok(cert.public_key().raw.to_vec())
}

/// Software signer over a decoded private key. No session state; the key is
/// held in memory for the lifetime of the signer and wiped on disposal.
#[derive(Debug)]
pub struct SoftwareSigner {
    certificate: Certificate,
    certificate_der: Vec<u8>,
    public_key_der: Vec<u8>,
    key: Mutex<Option<RsaPrivateKey>>,
}

impl SoftwareSigner {
    fn new(
        certificate: Certificate,
        certificate_der: Vec<u8>,
        public_key_der: Vec<u8>,
        key: RsaPrivateKey,
    ) -> Self {
        Self {
            certificate,
            certificate_der,
            public_key_der,
            key: Mutex::new(Some(key)),
        }
    }
}

impl Signer for SoftwareSigner {
    fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    fn sign(&mut self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let guard = self.key.lock().expect("signer lock poisoned");
        let key = guard.as_ref().ok_or(Error::SignerDisposed)?;
        if digest.len() != algorithm.digest_len() {
            return Err(Error::Signing(format!(
                "digest length {} does not match {}",
                digest.len(),
                algorithm.name()
            )));
        }
        let signature = match algorithm {
            DigestAlgorithm::Sha256 => rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone())
                .sign_prehash(digest)
                .map(|s| s.to_vec()),
            DigestAlgorithm::Sha384 => rsa::pkcs1v15::SigningKey::<Sha384>::new(key.clone())
                .sign_prehash(digest)
                .map(|s| s.to_vec()),
            DigestAlgorithm::Sha512 => rsa::pkcs1v15::SigningKey::<Sha512>::new(key.clone())
                .sign_prehash(digest)
                .map(|s| s.to_vec()),
        };
        signature.map_err(|e| Error::Signing(format!("RSA signing failed: {e}")))
    }

    fn dispose(&self) {
        // RsaPrivateKey zeroizes its material on drop.
        let _ = self.key.lock().expect("signer lock poisoned").take();
    }
}

impl Drop for SoftwareSigner {
    fn drop(&mut self) {
        self.dispose();
    }
}
