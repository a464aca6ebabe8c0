//! Document signing/verification engine boundary.
//!
//! The engine is the collaborator that actually embeds signatures into
//! documents and checks the ones already there. The subsystem talks to it
//! through [`DocumentEngine`]: it hands over an open [`Signer`] and an
//! appearance descriptor, and gets back either a signed document on disk or
//! raw per-signature verification results.

mod detached;

pub use detached::DetachedSignatureEngine;

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::appearance::AppearancePayload;
use crate::error::Result;
use crate::stores::Signer;

/// Declared metadata recorded inside a signature.
#[derive(Debug, Clone)]
pub struct SignatureMetadata {
    /// Signer display name.
    pub name: String,
    /// Reason for signing.
    pub reason: String,
    /// Location of signing.
    pub location: String,
    /// Contact information.
    pub contact_info: String,
    /// Moment the signature was produced.
    pub signing_time: DateTime<Utc>,
}

/// Raw engine verdict for one embedded signature, before trust mapping.
#[derive(Debug, Clone)]
pub struct RawSignature {
    /// DER of the signing certificate embedded in the signature.
    pub certificate_der: Vec<u8>,
    /// Signing time declared inside the signature.
    pub signing_time: Option<DateTime<Utc>>,
    /// Digest algorithm name (e.g. "SHA-256").
    pub digest_algorithm: String,
    /// Signature algorithm name (e.g. "RSA").
    pub signature_algorithm: String,
    /// `Some(true)` when the document is unchanged since signing,
    /// `Some(false)` when it was modified or the signature is malformed,
    /// `None` when the algorithm cannot be checked.
    pub cryptographically_valid: Option<bool>,
    /// Whether the certificate anchors to the engine's trusted roots.
    pub trusted_root: bool,
    /// Declared signer name.
    pub name: Option<String>,
    /// Declared reason.
    pub reason: Option<String>,
    /// Declared location.
    pub location: Option<String>,
    /// Declared contact information.
    pub contact_info: Option<String>,
    /// Free-text findings accumulated during verification.
    pub messages: Vec<String>,
}

/// The document signing and verification engine contract.
pub trait DocumentEngine: Send + Sync {
    /// Sign `input` into `output` using the signer's key.
    ///
    /// Must never leave a partially written output document behind on
    /// failure.
    fn sign_document(
        &self,
        input: &Path,
        output: &Path,
        signer: &mut dyn Signer,
        metadata: &SignatureMetadata,
        appearance: &AppearancePayload,
    ) -> Result<()>;

    /// Check every signature embedded in the document.
    ///
    /// A document without signatures yields an empty list, not an error.
    fn verify_document(&self, path: &Path) -> Result<Vec<RawSignature>>;
}
