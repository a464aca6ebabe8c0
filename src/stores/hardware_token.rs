//! Hardware-token store: PKCS#11 modules, slots, sessions, and objects.
//!
//! Every operation loads its own module instance and disposes it when done,
//! so concurrent signing operations never share login or session state.
//!
//! Listing walks `module → slots → read session → certificate objects` and
//! skips whatever fails along the way; one dead module or empty slot never
//! aborts the rest. Signing locates the owning slot by fingerprint over
//! unauthenticated sessions first (login may be unnecessary, and some tokens
//! reject repeated logins), then logs in, resolves the private key by
//! id/label/sole-key precedence, and signs with a mechanism probed once per
//! key: raw RSA gets a DER DigestInfo, EC gets the bare digest.

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectHandle};
use cryptoki::session::Session;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use x509_parser::prelude::*;

use super::token_objects::{
    backend_err, certificate_objects, login_session, private_key_candidates, select_private_key,
    wrap_digest_info,
};
use super::{DigestAlgorithm, Signer};
use crate::certificate::{fingerprint, Certificate, SourceKind, SourceLocator};
use crate::error::{Error, Result};

/// Smallest plausible native module.
const MIN_MODULE_SIZE: u64 = 1024;
/// Largest plausible native module (200 MiB).
const MAX_MODULE_SIZE: u64 = 200 * 1024 * 1024;

/// Store over a configured set of PKCS#11 module paths.
pub struct HardwareTokenStore {
    module_paths: Vec<PathBuf>,
}

impl HardwareTokenStore {
    /// Create a store over the configured token module paths.
    pub fn new(module_paths: Vec<PathBuf>) -> Self {
        Self { module_paths }
    }

    /// Enumerate certificates on every reachable token.
    pub fn list(&self) -> Vec<Certificate> {
        let mut certs = Vec::new();
        for path in &self.module_paths {
            if let Err(e) = validate_module_path(path) {
                warn!("skipping token module {}: {}", path.display(), e);
                continue;
            }
            match list_module(path) {
                Ok(mut found) => certs.append(&mut found),
                Err(e) => warn!("skipping token module {}: {}", path.display(), e),
            }
        }
        certs
    }

    /// Open a signer bound to the token that holds the certificate.
    pub fn open_signer(
        &self,
        certificate: &Certificate,
        credential: Option<&str>,
    ) -> Result<Box<dyn Signer>> {
        let module_path = match &certificate.locator {
            SourceLocator::HardwareToken { module_path, .. } => module_path.clone(),
            _ => return Err(Error::CertificateNotFound(certificate.fingerprint.clone())),
        };

        validate_module_path(&module_path)?;
        let ctx = load_module(&module_path)?;

        let slots = ctx.get_slots_with_token().map_err(backend_err)?;
        if slots.is_empty() {
            return Err(Error::BackendUnavailable(format!(
                "no tokens present behind module {}",
                module_path.display()
            )));
        }

        for slot in slots {
            let session = match ctx.open_rw_session(slot) {
                Ok(session) => session,
                Err(e) => {
                    debug!("cannot open session on slot: {e}");
                    continue;
                }
            };

            // Enumerate unauthenticated first; certificates are public
            // objects and login may be unnecessary or single-shot.
            let objects = match certificate_objects(&session) {
                Ok(objects) => objects,
                Err(e) => {
                    debug!("skipping unreadable slot: {e}");
                    continue;
                }
            };
            let matched = objects
                .into_iter()
                .find(|obj| fingerprint(&obj.der) == certificate.fingerprint);
            let Some(matched) = matched else {
                continue;
            };

            if let Some(pin) = credential {
                login_session(&session, pin)?;
            } else if certificate.requires_credential {
                return Err(Error::BadCredential(format!(
                    "certificate '{}' requires a PIN",
                    certificate.name
                )));
            }

            let candidates = private_key_candidates(&session)?;
            let key = select_private_key(&candidates, &matched.id, &matched.label)?
                .ok_or_else(|| {
                    Error::CapabilityMismatch(format!(
                        "certificate '{}' found on token but no private key accompanies it",
                        certificate.name
                    ))
                })?;

            let mechanism = probe_mechanism(&session, key)?;
            let cert = Certificate::from_der(
                &matched.der,
                SourceKind::HardwareToken,
                certificate.locator.clone(),
                Some(&matched.label),
            )
            .map(|mut c| {
                c.requires_credential = true;
                c
            })?;
            let public_key_der = spki_of(&matched.der)?;

            return Ok(Box::new(TokenSigner::new(
                cert,
                matched.der,
                public_key_der,
                ctx,
                session,
                key,
                mechanism,
            )));
        }

        Err(Error::CertificateNotFound(format!(
            "certificate not found in any token behind module {}",
            module_path.display()
        )))
    }
}

/// Reject implausible module paths before handing them to the dynamic
/// loader: regular files only, no symlinks, size within a sane range.
pub(crate) fn validate_module_path(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| {
        Error::BackendUnavailable(format!("module {} is not accessible: {e}", path.display()))
    })?;
    if meta.file_type().is_symlink() {
        return Err(Error::BackendUnavailable(format!(
            "module {} is a symlink",
            path.display()
        )));
    }
    if !meta.is_file() {
        return Err(Error::BackendUnavailable(format!(
            "module {} is not a regular file",
            path.display()
        )));
    }
    let size = meta.len();
    if !(MIN_MODULE_SIZE..=MAX_MODULE_SIZE).contains(&size) {
        return Err(Error::BackendUnavailable(format!(
            "module {} has implausible size {size}",
            path.display()
        )));
    }
    Ok(())
}

/// Load and initialize a module, tolerating a process-wide prior init.
pub(crate) fn load_module(path: &Path) -> Result<Pkcs11> {
    let ctx = Pkcs11::new(path).map_err(|e| {
        Error::BackendUnavailable(format!("failed to load module {}: {e}", path.display()))
    })?;
    match ctx.initialize(CInitializeArgs::OsThreads) {
        Ok(()) => Ok(ctx),
        Err(CkError::Pkcs11(RvError::CryptokiAlreadyInitialized, _)) => Ok(ctx),
        Err(e) => Err(Error::BackendUnavailable(format!(
            "failed to initialize module {}: {e}",
            path.display()
        ))),
    }
}

fn list_module(path: &Path) -> Result<Vec<Certificate>> {
    let ctx = load_module(path)?;
    let slots = ctx.get_slots_with_token().map_err(backend_err)?;

    let mut certs = Vec::new();
    for slot in slots {
        let slot_label = match ctx.get_token_info(slot) {
            Ok(info) => info.label().trim().to_string(),
            Err(e) => {
                debug!("skipping slot without token info: {e}");
                continue;
            }
        };
        let session = match ctx.open_ro_session(slot) {
            Ok(session) => session,
            Err(e) => {
                debug!("skipping slot '{slot_label}': cannot open session: {e}");
                continue;
            }
        };
        let objects = match certificate_objects(&session) {
            Ok(objects) => objects,
            Err(e) => {
                debug!("skipping slot '{slot_label}': {e}");
                continue;
            }
        };
        for obj in objects {
            let locator = SourceLocator::HardwareToken {
                module_path: path.to_path_buf(),
                slot_label: slot_label.clone(),
                object_label: obj.label.clone(),
            };
            match Certificate::from_der(&obj.der, SourceKind::HardwareToken, locator, Some(&obj.label))
            {
                Ok(mut cert) => {
                    if cert.is_ca {
                        continue;
                    }
                    cert.requires_credential = true;
                    certs.push(cert);
                }
                Err(e) => debug!("skipping unparseable token certificate: {e}"),
            }
        }
    }
    Ok(certs)
}

/// Which signing path the key requires. Probed once per key; the raw and
/// hash-combined paths must never be mixed for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenMechanism {
    /// Raw `CKM_RSA_PKCS`: caller frames the digest in a DigestInfo.
    RsaPkcs,
    /// `CKM_ECDSA` over the bare digest.
    Ecdsa,
}

fn probe_mechanism(session: &Session, key: ObjectHandle) -> Result<TokenMechanism> {
    let attrs = session
        .get_attributes(key, &[AttributeType::KeyType])
        .map_err(backend_err)?;
    for attr in attrs {
        if let Attribute::KeyType(key_type) = attr {
            return if key_type == KeyType::RSA {
                Ok(TokenMechanism::RsaPkcs)
            } else if key_type == KeyType::EC {
                Ok(TokenMechanism::Ecdsa)
            } else {
                Err(Error::CapabilityMismatch(format!(
                    "unsupported token key type {key_type:?}"
                )))
            };
        }
    }
    Err(Error::CapabilityMismatch(
        "token private key exposes no key type".to_string(),
    ))
}

fn spki_of(cert_der: &[u8]) -> Result<Vec<u8>> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| Error::Structural(format!("X.509 parse error: {e}")))?;
    Ok(cert.public_key().raw.to_vec())
}

#[derive(Debug)]
struct TokenResources {
    session: Session,
    key: ObjectHandle,
    mechanism: TokenMechanism,
    ctx: Pkcs11,
}

/// Signer bound to an open token session.
#[derive(Debug)]
pub struct TokenSigner {
    certificate: Certificate,
    certificate_der: Vec<u8>,
    public_key_der: Vec<u8>,
    resources: Mutex<Option<TokenResources>>,
}

impl TokenSigner {
    fn new(
        certificate: Certificate,
        certificate_der: Vec<u8>,
        public_key_der: Vec<u8>,
        ctx: Pkcs11,
        session: Session,
        key: ObjectHandle,
        mechanism: TokenMechanism,
    ) -> Self {
        Self {
            certificate,
            certificate_der,
            public_key_der,
            resources: Mutex::new(Some(TokenResources {
                session,
                key,
                mechanism,
                ctx,
            })),
        }
    }
}

impl Signer for TokenSigner {
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
        let guard = self.resources.lock().expect("signer lock poisoned");
        let resources = guard.as_ref().ok_or(Error::SignerDisposed)?;
        match resources.mechanism {
            TokenMechanism::RsaPkcs => {
                let framed = wrap_digest_info(digest, algorithm)?;
                resources
                    .session
                    .sign(&Mechanism::RsaPkcs, resources.key, &framed)
                    .map_err(|e| Error::Signing(format!("token signing failed: {e}")))
            }
            TokenMechanism::Ecdsa => resources
                .session
                .sign(&Mechanism::Ecdsa, resources.key, digest)
                .map_err(|e| Error::Signing(format!("token signing failed: {e}"))),
        }
    }

    fn dispose(&self) {
        // Closing the session and dropping the last context handle
        // finalizes and unloads the module. The taken-Option guard makes
        // repeated or racing calls no-ops.
        if let Some(resources) = self.resources.lock().expect("signer lock poisoned").take() {
            drop(resources.session);
            drop(resources.ctx);
        }
    }
}

impl Drop for TokenSigner {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_module_path_rejects_missing_file() {
        let err = validate_module_path(Path::new("/nonexistent/module.so")).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[test]
    fn test_validate_module_path_rejects_tiny_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.so");
        fs::write(&path, b"ELF").unwrap();
        let err = validate_module_path(&path).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert!(format!("{err}").contains("implausible size"));
    }

    #[test]
    fn test_validate_module_path_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_module_path(dir.path()).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[test]
    fn test_validate_module_path_accepts_plausible_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.so");
        fs::write(&path, vec![0u8; 4096]).unwrap();
        assert!(validate_module_path(&path).is_ok());
    }

    #[test]
    fn test_listing_skips_bogus_modules() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_module = dir.path().join("fake.so");
        fs::write(&not_a_module, vec![0u8; 4096]).unwrap();

        let store = HardwareTokenStore::new(vec![
            PathBuf::from("/nonexistent/module.so"),
            not_a_module,
        ]);
        // Neither path yields certificates; neither aborts the listing.
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_open_signer_with_foreign_locator_is_not_found() {
        let store = HardwareTokenStore::new(vec![]);
        let cert = Certificate {
            name: "test".to_string(),
            subject_dn: String::new(),
            issuer_dn: String::new(),
            serial_number: String::new(),
            valid_from: None,
            valid_to: None,
            fingerprint: "00".repeat(32),
            source: SourceKind::FileBundle,
            key_usage: Default::default(),
            is_valid: true,
            is_ca: false,
            requires_credential: false,
            credential_optional: false,
            locator: SourceLocator::FileBundle {
                path: PathBuf::from("/tmp/x.p12"),
            },
            alternate_sources: Vec::new(),
        };
        let err = store.open_signer(&cert, None).unwrap_err();
        assert!(matches!(err, Error::CertificateNotFound(_)));
    }
}
