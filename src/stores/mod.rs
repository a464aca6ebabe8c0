//! Certificate stores: the three backends behind one contract.
//!
//! Each store can enumerate certificates without credentials and open a
//! short-lived [`Signer`] for one of them. The set of backends is fixed and
//! small, so dispatch goes through the closed [`SourceAdapter`] enum rather
//! than open-ended plugins.

mod browser_store;
mod file_bundle;
mod hardware_token;
mod token_objects;

pub use browser_store::BrowserStore;
pub use file_bundle::FileBundleStore;
pub use hardware_token::HardwareTokenStore;

use der::asn1::ObjectIdentifier;
use serde::{Deserialize, Serialize};

use crate::certificate::{Certificate, SourceKind};
use crate::error::Result;

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Get the OID for this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            // 2.16.840.1.101.3.4.2.1
            DigestAlgorithm::Sha256 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1"),
            // 2.16.840.1.101.3.4.2.2
            DigestAlgorithm::Sha384 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2"),
            // 2.16.840.1.101.3.4.2.3
            DigestAlgorithm::Sha512 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3"),
        }
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Expected digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Parse an algorithm name produced by [`DigestAlgorithm::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SHA-256" => Some(DigestAlgorithm::Sha256),
            "SHA-384" => Some(DigestAlgorithm::Sha384),
            "SHA-512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }
}

/// A short-lived, backend-bound signing capability.
///
/// A signer is created per signing operation and disposed immediately after
/// use or on error. It is never cached or shared across operations: hardware
/// sessions and login state are backend-specific and must not leak.
///
/// One signer supports one in-flight signature at a time (`sign` takes
/// `&mut self`). Disposal is idempotent and safe to call from error-handling
/// paths racing normal completion.
pub trait Signer: Send + Sync + std::fmt::Debug {
    /// The certificate this signer is bound to.
    fn certificate(&self) -> &Certificate;

    /// DER encoding of the signing certificate, for chain embedding.
    fn certificate_der(&self) -> &[u8];

    /// SubjectPublicKeyInfo DER of the signing certificate's public key.
    fn public_key_der(&self) -> &[u8];

    /// Sign a pre-computed digest.
    fn sign(&mut self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>>;

    /// Release backend resources (sessions, module handles, key material).
    ///
    /// Safe to call multiple times and from multiple threads.
    fn dispose(&self);
}

/// The closed set of certificate stores.
pub enum SourceAdapter {
    /// PKCS#12 bundles and plain certificate files on disk.
    FileBundle(FileBundleStore),
    /// PKCS#11 hardware tokens.
    HardwareToken(HardwareTokenStore),
    /// The browser (NSS) certificate database.
    BrowserStore(BrowserStore),
}

impl SourceAdapter {
    /// Which kind of store this adapter wraps.
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceAdapter::FileBundle(_) => SourceKind::FileBundle,
            SourceAdapter::HardwareToken(_) => SourceKind::HardwareToken,
            SourceAdapter::BrowserStore(_) => SourceKind::BrowserStore,
        }
    }

    /// Enumerate every certificate discoverable without credentials.
    ///
    /// Unreadable locations are skipped, never failing the whole call.
    pub fn list(&self) -> Vec<Certificate> {
        match self {
            SourceAdapter::FileBundle(store) => store.list(),
            SourceAdapter::HardwareToken(store) => store.list(),
            SourceAdapter::BrowserStore(store) => store.list(),
        }
    }

    /// Open a signer for a certificate previously returned by [`list`].
    ///
    /// [`list`]: SourceAdapter::list
    pub fn open_signer(
        &self,
        certificate: &Certificate,
        credential: Option<&str>,
    ) -> Result<Box<dyn Signer>> {
        match self {
            SourceAdapter::FileBundle(store) => store.open_signer(certificate, credential),
            SourceAdapter::HardwareToken(store) => store.open_signer(certificate, credential),
            SourceAdapter::BrowserStore(store) => store.open_signer(certificate, credential),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        assert_eq!(DigestAlgorithm::Sha512.name(), "SHA-512");
        assert_eq!(DigestAlgorithm::from_name("SHA-384"), Some(DigestAlgorithm::Sha384));
        assert_eq!(DigestAlgorithm::from_name("MD5"), None);
    }

    #[test]
    fn test_digest_algorithm_lengths() {
        assert_eq!(DigestAlgorithm::Sha256.digest_len(), 32);
        assert_eq!(DigestAlgorithm::Sha384.digest_len(), 48);
        assert_eq!(DigestAlgorithm::Sha512.digest_len(), 64);
    }

    #[test]
    fn test_digest_algorithm_oids() {
        assert_eq!(
            DigestAlgorithm::Sha256.oid().to_string(),
            "2.16.840.1.101.3.4.2.1"
        );
    }
}
