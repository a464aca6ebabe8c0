//! Visible-signature appearance payloads.
//!
//! The document engine receives an appearance descriptor, not rendered
//! pixels: the box geometry, the text lines to draw, an optional decoded
//! logo image, and the font size. Invisible profiles produce an empty
//! payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::profile::{
    SignatureProfile, SignatureVisibility, DEFAULT_SIGNATURE_HEIGHT, DEFAULT_SIGNATURE_WIDTH,
};

/// Appearance descriptor handed to the document engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppearancePayload {
    /// Whether anything is drawn at all.
    pub visible: bool,
    /// Page number (1-indexed, 0 = last page).
    pub page: i32,
    /// X coordinate of the box, points from the left.
    pub x: f64,
    /// Y coordinate of the box, points from the bottom.
    pub y: f64,
    /// Box width in points.
    pub width: f64,
    /// Box height in points.
    pub height: f64,
    /// Text lines, top to bottom.
    pub lines: Vec<String>,
    /// Decoded logo image bytes, if the profile carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<Vec<u8>>,
    /// Font size in points.
    pub font_size: u32,
}

/// Build the appearance payload for a signing operation.
///
/// The signing time is rendered into the date line; the location line comes
/// from the profile. Degenerate box dimensions fall back to the defaults.
pub fn build_appearance(
    profile: &SignatureProfile,
    certificate: &Certificate,
    signing_time: DateTime<Utc>,
) -> AppearancePayload {
    if profile.visibility != SignatureVisibility::Visible {
        return AppearancePayload::default();
    }

    let mut width = profile.position.width;
    let mut height = profile.position.height;
    if width <= 0.0 {
        width = DEFAULT_SIGNATURE_WIDTH;
    }
    if height <= 0.0 {
        height = DEFAULT_SIGNATURE_HEIGHT;
    }

    let mut lines = Vec::new();
    if profile.appearance.show_signer_name {
        let name = if certificate.name.is_empty() {
            &certificate.subject_dn
        } else {
            &certificate.name
        };
        lines.push(format!("Signed by: {name}"));
    }
    if profile.appearance.show_signing_time {
        lines.push(format!(
            "Date: {}",
            signing_time.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if profile.appearance.show_location && !profile.location.is_empty() {
        lines.push(format!("Location: {}", profile.location));
    }
    if let Some(text) = &profile.appearance.custom_text {
        if !text.is_empty() {
            lines.push(text.clone());
        }
    }

    let logo = if profile.appearance.show_logo {
        profile
            .appearance
            .logo_data
            .as_deref()
            .and_then(decode_logo_data_url)
    } else {
        None
    };

    AppearancePayload {
        visible: true,
        page: profile.position.page.max(0),
        x: profile.position.x,
        y: profile.position.y,
        width,
        height,
        lines,
        logo,
        font_size: profile.appearance.font_size,
    }
}

/// Decode a `data:image/...;base64,` URL into image bytes.
fn decode_logo_data_url(data_url: &str) -> Option<Vec<u8>> {
    if !data_url.starts_with("data:image/") {
        return None;
    }
    let (_, payload) = data_url.split_once(',')?;
    BASE64.decode(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{SourceKind, SourceLocator};
    use crate::profile::{default_invisible_profile, default_visible_profile};
    use std::path::PathBuf;

    fn test_certificate() -> Certificate {
        Certificate {
            name: "Ana Torres".to_string(),
            subject_dn: "CN=Ana Torres, O=Test".to_string(),
            issuer_dn: "CN=Ana Torres, O=Test".to_string(),
            serial_number: "1".to_string(),
            valid_from: None,
            valid_to: None,
            fingerprint: "ab".repeat(32),
            source: SourceKind::FileBundle,
            key_usage: Default::default(),
            is_valid: true,
            is_ca: false,
            requires_credential: false,
            credential_optional: true,
            locator: SourceLocator::FileBundle {
                path: PathBuf::from("/tmp/a.p12"),
            },
            alternate_sources: Vec::new(),
        }
    }

    #[test]
    fn test_invisible_profile_yields_empty_payload() {
        let payload = build_appearance(
            &default_invisible_profile(),
            &test_certificate(),
            Utc::now(),
        );
        assert!(!payload.visible);
        assert!(payload.lines.is_empty());
    }

    #[test]
    fn test_visible_profile_builds_name_and_date_lines() {
        let time = DateTime::parse_from_rfc3339("2026-03-01T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = build_appearance(&default_visible_profile(), &test_certificate(), time);
        assert!(payload.visible);
        assert_eq!(payload.lines.len(), 2);
        assert_eq!(payload.lines[0], "Signed by: Ana Torres");
        assert_eq!(payload.lines[1], "Date: 2026-03-01 10:30:00 UTC");
        assert_eq!(payload.width, DEFAULT_SIGNATURE_WIDTH);
    }

    #[test]
    fn test_location_and_custom_text_lines() {
        let mut profile = default_visible_profile();
        profile.appearance.show_location = true;
        profile.location = "Madrid".to_string();
        profile.appearance.custom_text = Some("Approved".to_string());
        let payload = build_appearance(&profile, &test_certificate(), Utc::now());
        assert!(payload.lines.contains(&"Location: Madrid".to_string()));
        assert_eq!(payload.lines.last().unwrap(), "Approved");
    }

    #[test]
    fn test_degenerate_dimensions_fall_back_to_defaults() {
        let mut profile = default_visible_profile();
        profile.position.width = 0.0;
        profile.position.height = -5.0;
        let payload = build_appearance(&profile, &test_certificate(), Utc::now());
        assert_eq!(payload.width, DEFAULT_SIGNATURE_WIDTH);
        assert_eq!(payload.height, DEFAULT_SIGNATURE_HEIGHT);
    }

    #[test]
    fn test_logo_data_url_decoding() {
        let mut profile = default_visible_profile();
        profile.appearance.show_logo = true;
        profile.appearance.logo_data = Some(format!(
            "data:image/png;base64,{}",
            BASE64.encode(b"fake png bytes")
        ));
        let payload = build_appearance(&profile, &test_certificate(), Utc::now());
        assert_eq!(payload.logo.as_deref(), Some(&b"fake png bytes"[..]));

        profile.appearance.logo_data = Some("not a data url".to_string());
        let payload = build_appearance(&profile, &test_certificate(), Utc::now());
        assert!(payload.logo.is_none());
    }
}
