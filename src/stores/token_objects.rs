//! Shared PKCS#11 object plumbing for the token-backed stores.
//!
//! Both the hardware-token store and the browser store speak the same
//! object/session protocol: find objects by class, read value/label/id
//! attributes, match private keys to certificates, and log in with
//! idempotent semantics. The helpers here keep that protocol in one place;
//! key selection is a pure function so its precedence rules are testable
//! without a token.

use cryptoki::error::{Error as CkError, RvError};
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use der::asn1::{AnyRef, OctetStringRef};
use der::{Encode, Sequence};
use spki::AlgorithmIdentifier;

use super::DigestAlgorithm;
use crate::error::{Error, Result};

/// Map a PKCS#11 error into the backend-unavailable class.
pub(crate) fn backend_err(e: CkError) -> Error {
    Error::BackendUnavailable(format!("PKCS#11 error: {e}"))
}

/// A certificate object read from a token.
pub(crate) struct CertObject {
    pub der: Vec<u8>,
    pub label: String,
    pub id: Vec<u8>,
}

/// A private-key object's matching attributes.
pub(crate) struct KeyCandidate<H> {
    pub handle: H,
    pub id: Vec<u8>,
    pub label: String,
}

/// Token labels are fixed-width, NUL- or space-padded.
pub(crate) fn trim_label(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// Read every certificate object in the session.
///
/// Objects with unreadable attributes or an empty value are skipped, not
/// fatal.
pub(crate) fn certificate_objects(session: &Session) -> Result<Vec<CertObject>> {
    let handles = session
        .find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])
        .map_err(backend_err)?;

    let mut objects = Vec::new();
    for handle in handles {
        let attrs = match session.get_attributes(
            handle,
            &[AttributeType::Value, AttributeType::Label, AttributeType::Id],
        ) {
            Ok(attrs) => attrs,
            Err(_) => continue,
        };

        let mut der = Vec::new();
        let mut label = String::new();
        let mut id = Vec::new();
        for attr in attrs {
            match attr {
                Attribute::Value(value) => der = value,
                Attribute::Label(bytes) => label = trim_label(&bytes),
                Attribute::Id(bytes) => id = bytes,
                _ => {}
            }
        }
        if der.is_empty() {
            continue;
        }
        objects.push(CertObject { der, label, id });
    }
    Ok(objects)
}

/// Read every private-key object in the session with its matching
/// attributes.
pub(crate) fn private_key_candidates(session: &Session) -> Result<Vec<KeyCandidate<ObjectHandle>>> {
    let handles = session
        .find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])
        .map_err(backend_err)?;

    let mut candidates = Vec::new();
    for handle in handles {
        let mut id = Vec::new();
        let mut label = String::new();
        if let Ok(attrs) =
            session.get_attributes(handle, &[AttributeType::Id, AttributeType::Label])
        {
            for attr in attrs {
                match attr {
                    Attribute::Id(bytes) => id = bytes,
                    Attribute::Label(bytes) => label = trim_label(&bytes),
                    _ => {}
                }
            }
        }
        candidates.push(KeyCandidate { handle, id, label });
    }
    Ok(candidates)
}

/// Resolve the private key belonging to a certificate.
///
/// Precedence: identical `id` attribute (authoritative), then identical
/// label, then, only when the token holds exactly one private key, that
/// sole key. With several keys and no id/label match, signing must fail
/// rather than guess.
pub(crate) fn select_private_key<H: Copy>(
    candidates: &[KeyCandidate<H>],
    cert_id: &[u8],
    cert_label: &str,
) -> Result<Option<H>> {
    if !cert_id.is_empty() {
        if let Some(candidate) = candidates.iter().find(|c| c.id == cert_id) {
            return Ok(Some(candidate.handle));
        }
    }
    if !cert_label.is_empty() {
        if let Some(candidate) = candidates.iter().find(|c| c.label == cert_label) {
            return Ok(Some(candidate.handle));
        }
    }
    match candidates {
        [] => Ok(None),
        [only] => Ok(Some(only.handle)),
        _ => Err(Error::CapabilityMismatch(
            "token holds several private keys and none matches the certificate".to_string(),
        )),
    }
}

/// Log in to the token, treating "already logged in" as success.
///
/// A rejected PIN is reported as a credential error and never retried:
/// tokens may hard-lock after a few wrong attempts.
pub(crate) fn login_session(session: &Session, pin: &str) -> Result<()> {
    let pin = AuthPin::new(pin.to_string());
    match session.login(UserType::User, Some(&pin)) {
        Ok(()) => Ok(()),
        Err(CkError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => Ok(()),
        Err(CkError::Pkcs11(
            code @ (RvError::PinIncorrect
            | RvError::PinInvalid
            | RvError::PinLenRange
            | RvError::PinExpired
            | RvError::PinLocked),
            _,
        )) => Err(Error::BadCredential(format!("token rejected the PIN: {code}"))),
        Err(e) => Err(Error::BackendUnavailable(format!("token login failed: {e}"))),
    }
}

/// DigestInfo wrapper required by raw RSA signing mechanisms.
#[derive(Sequence)]
struct DigestInfo<'a> {
    algorithm: AlgorithmIdentifier<AnyRef<'a>>,
    digest: OctetStringRef<'a>,
}

/// Wrap a digest in a DER-encoded DigestInfo (hash OID + digest bytes).
///
/// Raw `CKM_RSA_PKCS` signs a padded block, not a bare hash, so the hash
/// algorithm must travel inside the signed data.
pub(crate) fn wrap_digest_info(digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    let info = DigestInfo {
        algorithm: AlgorithmIdentifier {
            oid: algorithm.oid(),
            parameters: Some(AnyRef::NULL),
        },
        digest: OctetStringRef::new(digest)
            .map_err(|e| Error::Signing(format!("DigestInfo encoding failed: {e}")))?,
    };
    info.to_der()
        .map_err(|e| Error::Signing(format!("DigestInfo encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(handle: u32, id: &[u8], label: &str) -> KeyCandidate<u32> {
        KeyCandidate {
            handle,
            id: id.to_vec(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_id_match_wins_over_label_match() {
        let candidates = vec![
            candidate(1, b"other", "signing-key"),
            candidate(2, b"cert-id", "unrelated"),
        ];
        // The label would select handle 1; the id must win and select 2.
        let selected = select_private_key(&candidates, b"cert-id", "signing-key").unwrap();
        assert_eq!(selected, Some(2));
    }

    #[test]
    fn test_label_match_when_no_id_match() {
        let candidates = vec![
            candidate(1, b"aaa", "signing-key"),
            candidate(2, b"bbb", "unrelated"),
        ];
        let selected = select_private_key(&candidates, b"zzz", "signing-key").unwrap();
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn test_sole_key_fallback() {
        let candidates = vec![candidate(7, b"", "")];
        let selected = select_private_key(&candidates, b"cert-id", "label").unwrap();
        assert_eq!(selected, Some(7));
    }

    #[test]
    fn test_multiple_unmatched_keys_fail_rather_than_guess() {
        let candidates = vec![candidate(1, b"aaa", "x"), candidate(2, b"bbb", "y")];
        let err = select_private_key(&candidates, b"zzz", "none").unwrap_err();
        assert!(matches!(err, Error::CapabilityMismatch(_)));
    }

    #[test]
    fn test_no_keys_resolves_to_none() {
        let candidates: Vec<KeyCandidate<u32>> = Vec::new();
        assert_eq!(select_private_key(&candidates, b"id", "label").unwrap(), None);
    }

    #[test]
    fn test_trim_label_strips_padding() {
        assert_eq!(trim_label(b"My Token\0\0\0"), "My Token");
        assert_eq!(trim_label(b"Padded Label   "), "Padded Label");
    }

    #[test]
    fn test_digest_info_encoding_matches_known_prefix() {
        // Well-known SHA-256 DigestInfo prefix from RFC 8017.
        const SHA256_PREFIX: &[u8] = &[
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x01, 0x05, 0x00, 0x04, 0x20,
        ];
        let digest = [0xabu8; 32];
        let encoded = wrap_digest_info(&digest, DigestAlgorithm::Sha256).unwrap();
        assert_eq!(&encoded[..SHA256_PREFIX.len()], SHA256_PREFIX);
        assert_eq!(&encoded[SHA256_PREFIX.len()..], &digest);
    }
}
