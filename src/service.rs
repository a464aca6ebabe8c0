//! The signing service: the interface consumed by CLI/GUI callers.
//!
//! Wires the catalog, the profile store, and the document engine together:
//! certificate listing and search, profile management, signing with a
//! profile (and optional position override), and verification.

use chrono::Utc;
use log::warn;
use std::path::{Path, PathBuf};

use crate::appearance::build_appearance;
use crate::catalog::{CertificateCatalog, CertificateFilter};
use crate::certificate::{Certificate, SourceKind};
use crate::config::SigningConfig;
use crate::engine::{DetachedSignatureEngine, DocumentEngine, SignatureMetadata};
use crate::error::{Error, Result};
use crate::profile::{validate_profile, ProfileStore, SignaturePosition, SignatureProfile, SignatureVisibility};
use crate::stores::{BrowserStore, FileBundleStore, HardwareTokenStore, SourceAdapter};
use crate::verify::{evaluate, SignatureInfo};

/// Visible signatures larger than this are rejected, in points.
const MAX_SIGNATURE_DIMENSION: f64 = 2000.0;

/// One signing request.
#[derive(Clone)]
pub struct SignRequest<'a> {
    /// Document to sign.
    pub document: &'a Path,
    /// Fingerprint of the certificate to sign with.
    pub fingerprint: &'a str,
    /// PIN or password, when the certificate needs one.
    pub credential: Option<&'a str>,
    /// Profile id; `None` uses the default profile.
    pub profile_id: Option<&'a str>,
    /// Replaces the profile's position for this operation only.
    pub position_override: Option<SignaturePosition>,
    /// Prefer this store when the fingerprint is reachable through several.
    pub preferred_source: Option<SourceKind>,
}

impl std::fmt::Debug for SignRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignRequest")
            .field("document", &self.document)
            .field("fingerprint", &self.fingerprint)
            .field("credential", &self.credential.map(|_| "[REDACTED]"))
            .field("profile_id", &self.profile_id)
            .field("position_override", &self.position_override)
            .field("preferred_source", &self.preferred_source)
            .finish()
    }
}

/// Front door of the signature subsystem.
pub struct SignatureService {
    catalog: CertificateCatalog,
    profiles: ProfileStore,
    engine: Box<dyn DocumentEngine>,
}

impl SignatureService {
    /// Build a service from configuration, with the default engine.
    pub fn new(config: &SigningConfig) -> Self {
        Self::with_engine(config, Box::new(DetachedSignatureEngine::new()))
    }

    /// Build a service with a caller-provided document engine.
    pub fn with_engine(config: &SigningConfig, engine: Box<dyn DocumentEngine>) -> Self {
        let adapters = vec![
            SourceAdapter::FileBundle(FileBundleStore::new(config.certificate_dirs.clone())),
            SourceAdapter::HardwareToken(HardwareTokenStore::new(config.token_modules.clone())),
            SourceAdapter::BrowserStore(BrowserStore::new(
                config.browser_db_dir.clone(),
                config.browser_modules.clone(),
            )),
        ];
        Self {
            catalog: CertificateCatalog::new(adapters),
            profiles: ProfileStore::new(config.profile_dir.clone()),
            engine,
        }
    }

    /// List certificates across all stores, optionally filtered.
    pub fn list_certificates(&self, filter: &CertificateFilter) -> Vec<Certificate> {
        self.catalog.filter(filter)
    }

    /// Search certificates by name, subject, issuer, or serial.
    pub fn search_certificates(&self, query: &str) -> Vec<Certificate> {
        self.catalog.search(query)
    }

    /// Sign a document. Returns the path of the signed copy.
    pub fn sign(&self, request: &SignRequest<'_>) -> Result<PathBuf> {
        let mut profile = match request.profile_id {
            Some(id) => self.profiles.get(id)?,
            None => self.profiles.default_profile(),
        };
        apply_position_override(&mut profile, request.position_override)?;
        validate_profile(&profile)?;

        let resolution = self
            .catalog
            .resolve(request.fingerprint, request.preferred_source)?;
        if resolution.ambiguous {
            warn!(
                "certificate {} is reachable through several stores; using {}",
                request.fingerprint,
                resolution.certificate.source.name()
            );
        }
        let certificate = resolution.certificate;

        if !certificate.is_valid {
            return Err(Error::CapabilityMismatch(format!(
                "certificate '{}' is expired or not yet valid",
                certificate.name
            )));
        }
        if !certificate.can_sign() {
            return Err(Error::CapabilityMismatch(format!(
                "certificate '{}' does not have digital signature capability",
                certificate.name
            )));
        }

        let adapter = self
            .catalog
            .adapter(certificate.source)
            .ok_or_else(|| Error::BackendUnavailable(certificate.source.name().to_string()))?;

        let mut signer = adapter.open_signer(&certificate, request.credential)?;

        // The signer carries the decoded certificate, which is authoritative
        // where the listing was optimistic (locked bundles).
        let signer_cert = signer.certificate().clone();
        if !signer_cert.can_sign() {
            signer.dispose();
            return Err(Error::CapabilityMismatch(format!(
                "certificate '{}' does not have digital signature capability",
                signer_cert.name
            )));
        }

        let signing_time = Utc::now();
        let appearance = build_appearance(&profile, &signer_cert, signing_time);
        let metadata = SignatureMetadata {
            name: signer_cert.name.clone(),
            reason: profile.reason.clone(),
            location: profile.location.clone(),
            contact_info: profile.contact_info.clone(),
            signing_time,
        };

        let output = signed_output_path(request.document);
        let result =
            self.engine
                .sign_document(request.document, &output, signer.as_mut(), &metadata, &appearance);
        // Disposal runs on the failure path too; sessions must not leak.
        signer.dispose();
        result.map(|()| output)
    }

    /// Verify every signature embedded in a document.
    pub fn verify(&self, document: &Path) -> Result<Vec<SignatureInfo>> {
        let raw = self.engine.verify_document(document)?;
        Ok(raw.iter().map(evaluate).collect())
    }

    /// All signature profiles, built-ins first.
    pub fn list_profiles(&self) -> Vec<SignatureProfile> {
        self.profiles.list()
    }

    /// Look up a profile by id.
    pub fn get_profile(&self, id: &str) -> Result<SignatureProfile> {
        self.profiles.get(id)
    }

    /// Persist a caller-created profile.
    pub fn save_profile(&self, profile: &SignatureProfile) -> Result<()> {
        self.profiles.save(profile)
    }

    /// Delete a caller-created profile.
    pub fn delete_profile(&self, id: &str) -> Result<()> {
        self.profiles.delete(id)
    }
}

/// Apply a per-operation position override without touching the stored
/// profile. Degenerate values fall back to defaults; oversized boxes are
/// rejected.
fn apply_position_override(
    profile: &mut SignatureProfile,
    position: Option<SignaturePosition>,
) -> Result<()> {
    let Some(mut position) = position else {
        return Ok(());
    };
    if profile.visibility != SignatureVisibility::Visible {
        return Ok(());
    }

    if position.width <= 0.0 {
        position.width = crate::profile::DEFAULT_SIGNATURE_WIDTH;
    }
    if position.height <= 0.0 {
        position.height = crate::profile::DEFAULT_SIGNATURE_HEIGHT;
    }
    if position.page <= 0 {
        position.page = 1;
    }
    if position.width > MAX_SIGNATURE_DIMENSION {
        return Err(Error::InvalidProfile(format!(
            "signature width too large: {:.2} points (maximum {MAX_SIGNATURE_DIMENSION:.2})",
            position.width
        )));
    }
    if position.height > MAX_SIGNATURE_DIMENSION {
        return Err(Error::InvalidProfile(format!(
            "signature height too large: {:.2} points (maximum {MAX_SIGNATURE_DIMENSION:.2})",
            position.height
        )));
    }

    profile.position = position;
    Ok(())
}

/// Signed copies land next to the input as `<stem>_signed.pdf`.
fn signed_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    input.with_file_name(format!("{stem}_signed.pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::default_visible_profile;

    #[test]
    fn test_signed_output_path() {
        assert_eq!(
            signed_output_path(Path::new("/docs/contract.pdf")),
            PathBuf::from("/docs/contract_signed.pdf")
        );
        assert_eq!(
            signed_output_path(Path::new("report.PDF")),
            PathBuf::from("report_signed.pdf")
        );
    }

    #[test]
    fn test_position_override_defaults_degenerate_values() {
        let mut profile = default_visible_profile();
        apply_position_override(
            &mut profile,
            Some(SignaturePosition {
                page: 0,
                x: 10.0,
                y: 20.0,
                width: -1.0,
                height: 0.0,
            }),
        )
        .unwrap();
        assert_eq!(profile.position.page, 1);
        assert_eq!(profile.position.width, crate::profile::DEFAULT_SIGNATURE_WIDTH);
        assert_eq!(profile.position.height, crate::profile::DEFAULT_SIGNATURE_HEIGHT);
        assert_eq!(profile.position.x, 10.0);
    }

    #[test]
    fn test_position_override_rejects_oversized_boxes() {
        let mut profile = default_visible_profile();
        let err = apply_position_override(
            &mut profile,
            Some(SignaturePosition {
                page: 1,
                x: 0.0,
                y: 0.0,
                width: 5000.0,
                height: 50.0,
            }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidProfile(_)));
    }

    #[test]
    fn test_sign_request_debug_redacts_credential() {
        let request = SignRequest {
            document: Path::new("/tmp/contract.pdf"),
            fingerprint: "abcd",
            credential: Some("secret-pin"),
            profile_id: None,
            position_override: None,
            preferred_source: None,
        };
        let debug = format!("{:?}", request);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret-pin"));
    }

    #[test]
    fn test_position_override_ignored_for_invisible_profiles() {
        let mut profile = crate::profile::default_invisible_profile();
        let original = profile.position;
        apply_position_override(
            &mut profile,
            Some(SignaturePosition {
                page: 3,
                x: 1.0,
                y: 2.0,
                width: 100.0,
                height: 50.0,
            }),
        )
        .unwrap();
        assert_eq!(profile.position, original);
    }
}
