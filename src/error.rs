//! Error types for the signature subsystem.
//!
//! Failures are classified so callers can render an actionable message: a
//! wrong PIN is not the same as a missing private key, and neither is the
//! same as a module that failed to load.

/// Result type alias for signature subsystem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while discovering certificates, signing, or
/// verifying documents.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No certificate with the given fingerprint is known to any backend.
    #[error("certificate not found: {0}")]
    CertificateNotFound(String),

    /// The supplied PIN or password was rejected by the backend.
    ///
    /// Never retried automatically: hardware tokens may lock after a few
    /// failed attempts.
    #[error("incorrect credential: {0}")]
    BadCredential(String),

    /// The certificate exists but cannot be used to sign (no usable private
    /// key, or no signing key usage).
    #[error("certificate cannot sign: {0}")]
    CapabilityMismatch(String),

    /// A backend (token module, store) failed to load or initialize.
    #[error("signing backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Corrupt or malformed certificate/bundle data.
    #[error("invalid certificate data: {0}")]
    Structural(String),

    /// The signer was already disposed when an operation was attempted.
    #[error("signer has been disposed")]
    SignerDisposed,

    /// No signature profile with the given id exists.
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// A signature profile failed validation.
    #[error("invalid signature profile: {0}")]
    InvalidProfile(String),

    /// Built-in profiles cannot be modified or deleted.
    #[error("cannot modify built-in profile: {0}")]
    BuiltinProfile(String),

    /// Document signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Document verification failed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_credential_message() {
        let err = Error::BadCredential("token PIN rejected".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("incorrect credential"));
        assert!(msg.contains("token PIN rejected"));
    }

    #[test]
    fn test_credential_and_structural_are_distinct() {
        let bad_pw = Error::BadCredential("wrong password".to_string());
        let corrupt = Error::Structural("truncated container".to_string());
        assert!(!format!("{}", bad_pw).contains("invalid certificate data"));
        assert!(format!("{}", corrupt).contains("invalid certificate data"));
    }

    #[test]
    fn test_capability_mismatch_message() {
        let err = Error::CapabilityMismatch("missing private key".to_string());
        assert!(format!("{}", err).contains("cannot sign"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
