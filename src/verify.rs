//! Verification results: mapping raw engine verdicts into the unified
//! [`SignatureInfo`].
//!
//! The engine answers "is the document unchanged" and "does the certificate
//! anchor to a trusted root"; this module folds those into three buckets
//! (valid and trusted, cryptographically valid but untrusted/unverifiable,
//! invalid) and evaluates certificate temporal validity against the
//! signature's declared signing time. A certificate that validly expired
//! after signing must not retroactively invalidate the signature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

use crate::engine::RawSignature;

/// Trust bucket of a verified signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureTrust {
    /// Cryptographically valid and anchored to a trusted root.
    Trusted,
    /// Cryptographically valid (or unverifiable) but the chain is not
    /// trusted or cannot be checked.
    Untrusted,
    /// The document was modified or the signature is malformed.
    Invalid,
}

/// Unified result for one signature embedded in a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    /// Signer display name.
    pub signer_name: String,
    /// Signer distinguished name from the certificate.
    pub signer_dn: String,
    /// Declared signing time.
    pub signing_time: Option<DateTime<Utc>>,
    /// Digest algorithm name.
    pub hash_algorithm: String,
    /// Signature algorithm name.
    pub signature_algorithm: String,
    /// Whether the document is unchanged since signing.
    pub is_cryptographically_valid: bool,
    /// Whether the certificate was valid (trusted and inside its validity
    /// window) at the signing time.
    pub is_certificate_valid: bool,
    /// Trust bucket.
    pub trust: SignatureTrust,
    /// Human-readable signature verdict.
    pub validation_message: String,
    /// Human-readable certificate verdict.
    pub certificate_validation_message: String,
    /// Declared reason.
    pub reason: String,
    /// Declared location.
    pub location: String,
    /// Declared contact information.
    pub contact_info: String,
}

/// Fold one raw engine verdict into a [`SignatureInfo`].
pub fn evaluate(raw: &RawSignature) -> SignatureInfo {
    let parsed = parse_x509_certificate(&raw.certificate_der).ok();

    let signer_dn = parsed
        .as_ref()
        .map(|(_, cert)| cert.subject().to_string())
        .unwrap_or_default();
    let signer_name = raw
        .name
        .clone()
        .or_else(|| {
            parsed.as_ref().and_then(|(_, cert)| {
                cert.subject()
                    .iter_common_name()
                    .next()
                    .and_then(|cn| cn.as_str().ok())
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| signer_dn.clone());

    // Temporal validity is judged at the declared signing time; only when
    // the signature declares none does the current time apply.
    let reference_time = raw.signing_time.unwrap_or_else(Utc::now);
    let temporal = parsed.as_ref().map(|(_, cert)| {
        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0);
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0);
        match (not_before, not_after) {
            (Some(from), Some(_)) if reference_time < from => TemporalValidity::NotYetValid,
            (Some(_), Some(to)) if reference_time > to => TemporalValidity::Expired,
            (Some(_), Some(_)) => TemporalValidity::Valid,
            _ => TemporalValidity::Expired,
        }
    });

    let (is_cryptographically_valid, trust, mut validation_message) =
        match raw.cryptographically_valid {
            Some(true) => (
                true,
                if raw.trusted_root {
                    SignatureTrust::Trusted
                } else {
                    SignatureTrust::Untrusted
                },
                "Signature is cryptographically valid".to_string(),
            ),
            Some(false) => (
                false,
                SignatureTrust::Invalid,
                "Signature validation failed".to_string(),
            ),
            None => (
                false,
                SignatureTrust::Untrusted,
                "Signature could not be verified".to_string(),
            ),
        };
    for message in &raw.messages {
        validation_message.push_str("; ");
        validation_message.push_str(message);
    }

    let temporal_ok = matches!(temporal, Some(TemporalValidity::Valid));
    let is_certificate_valid = temporal_ok && raw.trusted_root;
    let certificate_validation_message = match temporal {
        None => "Certificate could not be read from the signature".to_string(),
        Some(TemporalValidity::Expired) => {
            "Certificate was expired at signing time".to_string()
        }
        Some(TemporalValidity::NotYetValid) => {
            "Certificate was not yet valid at signing time".to_string()
        }
        Some(TemporalValidity::Valid) if raw.trusted_root => {
            "Certificate is valid and trusted".to_string()
        }
        Some(TemporalValidity::Valid) => {
            "Certificate chain validation issue (not in trust store)".to_string()
        }
    };

    SignatureInfo {
        signer_name,
        signer_dn,
        signing_time: raw.signing_time,
        hash_algorithm: raw.digest_algorithm.clone(),
        signature_algorithm: raw.signature_algorithm.clone(),
        is_cryptographically_valid,
        is_certificate_valid,
        trust,
        validation_message,
        certificate_validation_message,
        reason: raw.reason.clone().unwrap_or_default(),
        location: raw.location.clone().unwrap_or_default(),
        contact_info: raw.contact_info.clone().unwrap_or_default(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemporalValidity {
    Valid,
    Expired,
    NotYetValid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SIGNING_CERT: &[u8] = include_bytes!("../tests/fixtures/signing_cert.der");

    fn raw(valid: Option<bool>, trusted: bool, signing_time: Option<DateTime<Utc>>) -> RawSignature {
        RawSignature {
            certificate_der: SIGNING_CERT.to_vec(),
            signing_time,
            digest_algorithm: "SHA-256".to_string(),
            signature_algorithm: "RSA".to_string(),
            cryptographically_valid: valid,
            trusted_root: trusted,
            name: Some("Ana Torres".to_string()),
            reason: Some("Approval".to_string()),
            location: None,
            contact_info: None,
            messages: Vec::new(),
        }
    }

    fn cert_window() -> (DateTime<Utc>, DateTime<Utc>) {
        let (_, cert) = parse_x509_certificate(SIGNING_CERT).unwrap();
        (
            DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0).unwrap(),
            DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0).unwrap(),
        )
    }

    #[test]
    fn test_valid_and_trusted_bucket() {
        let (from, _) = cert_window();
        let info = evaluate(&raw(Some(true), true, Some(from + Duration::days(1))));
        assert!(info.is_cryptographically_valid);
        assert!(info.is_certificate_valid);
        assert_eq!(info.trust, SignatureTrust::Trusted);
        assert_eq!(info.signer_name, "Ana Torres");
        assert!(info.signer_dn.contains("Ana Torres"));
        assert_eq!(info.reason, "Approval");
    }

    #[test]
    fn test_valid_but_untrusted_bucket() {
        let (from, _) = cert_window();
        let info = evaluate(&raw(Some(true), false, Some(from + Duration::days(1))));
        assert!(info.is_cryptographically_valid);
        assert!(!info.is_certificate_valid);
        assert_eq!(info.trust, SignatureTrust::Untrusted);
        assert!(info.certificate_validation_message.contains("trust store"));
    }

    #[test]
    fn test_invalid_bucket() {
        let info = evaluate(&raw(Some(false), true, Some(Utc::now())));
        assert!(!info.is_cryptographically_valid);
        assert_eq!(info.trust, SignatureTrust::Invalid);
        assert!(info.validation_message.contains("failed"));
    }

    #[test]
    fn test_unverifiable_algorithm_is_not_invalid() {
        let mut r = raw(None, false, Some(Utc::now()));
        r.signature_algorithm = "ECDSA".to_string();
        let info = evaluate(&r);
        assert!(!info.is_cryptographically_valid);
        assert_eq!(info.trust, SignatureTrust::Untrusted);
        assert!(info.validation_message.contains("could not be verified"));
    }

    #[test]
    fn test_certificate_validity_follows_signing_time_not_clock() {
        let (from, to) = cert_window();

        // Declared signing time before the validity window: invalid even
        // though the certificate is fine right now.
        let info = evaluate(&raw(Some(true), true, Some(from - Duration::days(30))));
        assert!(!info.is_certificate_valid);
        assert!(info
            .certificate_validation_message
            .contains("not yet valid at signing time"));

        // Declared signing time after expiry.
        let info = evaluate(&raw(Some(true), true, Some(to + Duration::days(30))));
        assert!(!info.is_certificate_valid);
        assert!(info
            .certificate_validation_message
            .contains("expired at signing time"));

        // Inside the window.
        let info = evaluate(&raw(Some(true), true, Some(from + Duration::days(1))));
        assert!(info.is_certificate_valid);
    }
}
