//! Browser-store adapter: the NSS certificate database.
//!
//! The database is reached through the browser's own soft-token PKCS#11
//! module (p11-kit proxy or `libsoftokn3`), discovered from a configured
//! candidate list and gated on the database directory existing. Only
//! certificates with an accompanying private-key object (matched by `id`
//! attribute) are reported, under their database nickname. The database is
//! never written to.

use cryptoki::context::Pkcs11;
use cryptoki::mechanism::Mechanism;
use cryptoki::object::ObjectHandle;
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use x509_parser::prelude::*;

use super::hardware_token::load_module;
use super::token_objects::{
    backend_err, certificate_objects, login_session, private_key_candidates, select_private_key,
};
use super::{DigestAlgorithm, Signer};
use crate::certificate::{Certificate, SourceKind, SourceLocator};
use crate::error::{Error, Result};

/// Store over the browser (NSS) certificate database.
pub struct BrowserStore {
    db_dir: Option<PathBuf>,
    module_paths: Vec<PathBuf>,
}

impl BrowserStore {
    /// Create a store over the database directory and soft-token module
    /// candidates.
    pub fn new(db_dir: Option<PathBuf>, module_paths: Vec<PathBuf>) -> Self {
        Self {
            db_dir,
            module_paths,
        }
    }

    /// Enumerate certificates that have an accompanying private key.
    pub fn list(&self) -> Vec<Certificate> {
        let Some(db_dir) = &self.db_dir else {
            return Vec::new();
        };
        if !db_dir.is_dir() {
            debug!("browser database {} not present", db_dir.display());
            return Vec::new();
        }

        // The first module that yields certificates wins; the others are
        // alternative paths to the same database.
        for module in &self.module_paths {
            if !module.is_file() {
                continue;
            }
            match list_store(module) {
                Ok(certs) if !certs.is_empty() => return certs,
                Ok(_) => continue,
                Err(e) => {
                    warn!("browser module {} unusable: {e}", module.display());
                    continue;
                }
            }
        }
        Vec::new()
    }

    /// Resolve the nickname to its native handles and wrap them in a signer.
    pub fn open_signer(
        &self,
        certificate: &Certificate,
        credential: Option<&str>,
    ) -> Result<Box<dyn Signer>> {
        let nickname = match &certificate.locator {
            SourceLocator::BrowserStore { nickname } => nickname.clone(),
            _ => return Err(Error::CertificateNotFound(certificate.fingerprint.clone())),
        };

        let db_present = self.db_dir.as_deref().map(Path::is_dir).unwrap_or(false);
        if !db_present {
            return Err(Error::BackendUnavailable(
                "browser certificate database is not present".to_string(),
            ));
        }

        for module in &self.module_paths {
            if !module.is_file() {
                continue;
            }
            let ctx = match load_module(module) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!("browser module {} unusable: {e}", module.display());
                    continue;
                }
            };
            let slots = match ctx.get_slots_with_token() {
                Ok(slots) => slots,
                Err(e) => {
                    debug!("browser module {}: {e}", module.display());
                    continue;
                }
            };
            for slot in slots {
                let session = match ctx.open_rw_session(slot) {
                    Ok(session) => session,
                    Err(_) => continue,
                };

                let objects = match certificate_objects(&session) {
                    Ok(objects) => objects,
                    Err(e) => {
                        debug!("skipping unreadable browser slot: {e}");
                        continue;
                    }
                };
                let matched = objects.into_iter().find(|obj| {
                    crate::certificate::fingerprint(&obj.der) == certificate.fingerprint
                        || obj.label == nickname
                });
                let Some(matched) = matched else {
                    continue;
                };

                match credential {
                    Some(pin) => login_session(&session, pin)?,
                    // The database default is an empty password; failures
                    // here just mean the keys stay locked.
                    None => try_empty_login(&session),
                }

                let candidates = private_key_candidates(&session)?;
                let key = select_private_key(&candidates, &matched.id, &matched.label)?
                    .ok_or_else(|| {
                        Error::CapabilityMismatch(format!(
                            "no private key handle for nickname '{nickname}'"
                        ))
                    })?;

                let cert = Certificate::from_der(
                    &matched.der,
                    SourceKind::BrowserStore,
                    certificate.locator.clone(),
                    Some(&matched.label),
                )?;
                let public_key_der = {
                    let (_, parsed) = parse_x509_certificate(&matched.der)
                        .map_err(|e| Error::Structural(format!("X.509 parse error: {e}")))?;
                    parsed.public_key().raw.to_vec()
                };

                return Ok(Box::new(BrowserSigner::new(
                    cert,
                    matched.der,
                    public_key_der,
                    ctx,
                    session,
                    key,
                )));
            }
        }

        Err(Error::CertificateNotFound(format!(
            "nickname '{nickname}' not found in the browser store"
        )))
    }
}

fn try_empty_login(session: &Session) {
    let empty = AuthPin::new(String::new());
    let _ = session.login(UserType::User, Some(&empty));
}

fn list_store(module: &Path) -> Result<Vec<Certificate>> {
    let ctx = load_module(module)?;
    let slots = ctx.get_slots_with_token().map_err(backend_err)?;

    let mut certs = Vec::new();
    for slot in slots {
        let session = match ctx.open_ro_session(slot) {
            Ok(session) => session,
            Err(_) => continue,
        };
        try_empty_login(&session);

        // Cross-reference private keys first so only signable entries are
        // reported.
        let key_ids: HashSet<Vec<u8>> = match private_key_candidates(&session) {
            Ok(candidates) => candidates
                .into_iter()
                .filter(|c| !c.id.is_empty())
                .map(|c| c.id)
                .collect(),
            Err(e) => {
                debug!("skipping browser slot: {e}");
                continue;
            }
        };

        let objects = match certificate_objects(&session) {
            Ok(objects) => objects,
            Err(e) => {
                debug!("skipping browser slot: {e}");
                continue;
            }
        };
        for obj in objects {
            if obj.id.is_empty() || !key_ids.contains(&obj.id) {
                continue;
            }
            let locator = SourceLocator::BrowserStore {
                nickname: obj.label.clone(),
            };
            match Certificate::from_der(&obj.der, SourceKind::BrowserStore, locator, Some(&obj.label))
            {
                Ok(mut cert) => {
                    if cert.is_ca || !cert.can_sign() {
                        continue;
                    }
                    cert.requires_credential = false;
                    cert.credential_optional = true;
                    certs.push(cert);
                }
                Err(e) => debug!("skipping unparseable browser certificate: {e}"),
            }
        }
    }
    Ok(certs)
}

#[derive(Debug)]
struct BrowserResources {
    session: Session,
    key: ObjectHandle,
    ctx: Pkcs11,
}

/// Signer over the browser store's native signing primitive.
///
/// The primitive receives the raw digest; the store performs the padding
/// internally, so no DigestInfo framing happens here.
#[derive(Debug)]
pub struct BrowserSigner {
    certificate: Certificate,
    certificate_der: Vec<u8>,
    public_key_der: Vec<u8>,
    resources: Mutex<Option<BrowserResources>>,
}

impl BrowserSigner {
    fn new(
        certificate: Certificate,
        certificate_der: Vec<u8>,
        public_key_der: Vec<u8>,
        ctx: Pkcs11,
        session: Session,
        key: ObjectHandle,
    ) -> Self {
        Self {
            certificate,
            certificate_der,
            public_key_der,
            resources: Mutex::new(Some(BrowserResources { session, key, ctx })),
        }
    }
}

impl Signer for BrowserSigner {
    fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    fn sign(&mut self, digest: &[u8], _algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let guard = self.resources.lock().expect("signer lock poisoned");
        let resources = guard.as_ref().ok_or(Error::SignerDisposed)?;
        resources
            .session
            .sign(&Mechanism::RsaPkcs, resources.key, digest)
            .map_err(|e| Error::Signing(format!("browser store signing failed: {e}")))
    }

    fn dispose(&self) {
        if let Some(resources) = self.resources.lock().expect("signer lock poisoned").take() {
            drop(resources.session);
            drop(resources.ctx);
        }
    }
}

impl Drop for BrowserSigner {
    fn drop(&mut self) {
        self.dispose();
    }
}
