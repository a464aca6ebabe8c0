//! Signature profiles: named, persisted configurations for how a signature
//! is produced and rendered.
//!
//! Two built-in profiles always exist under fixed ids: an invisible default
//! and a visible one placed bottom-right on the last page. Caller-created
//! profiles are persisted as JSON records keyed by a stable id; the
//! built-ins can never be overwritten or deleted.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Id of the built-in invisible profile.
pub const DEFAULT_INVISIBLE_PROFILE_ID: &str = "default-invisible";
/// Id of the built-in visible profile.
pub const DEFAULT_VISIBLE_PROFILE_ID: &str = "default-visible";

/// Default width of a visible signature box, in points.
pub const DEFAULT_SIGNATURE_WIDTH: f64 = 200.0;
/// Default height of a visible signature box, in points.
pub const DEFAULT_SIGNATURE_HEIGHT: f64 = 80.0;

/// Whether a signature renders a visible appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureVisibility {
    /// Digital signature only, nothing drawn on the page.
    Invisible,
    /// A signature box is drawn at the configured position.
    Visible,
}

/// Where a visible signature appears on the page.
///
/// Coordinates are in points from the bottom-left corner. Page numbers are
/// 1-indexed; 0 means the last page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePosition {
    /// Page number (1-indexed, 0 = last page).
    pub page: i32,
    /// X coordinate in points, from the left.
    pub x: f64,
    /// Y coordinate in points, from the bottom.
    pub y: f64,
    /// Width of the signature box.
    pub width: f64,
    /// Height of the signature box.
    pub height: f64,
}

impl Default for SignaturePosition {
    fn default() -> Self {
        Self {
            page: 0,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        }
    }
}

/// What a visible signature shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppearanceOptions {
    /// Show the signer name line.
    pub show_signer_name: bool,
    /// Show the signing timestamp line.
    pub show_signing_time: bool,
    /// Show the location line.
    pub show_location: bool,
    /// Show a logo image.
    pub show_logo: bool,
    /// Logo as a base64 `data:image/...` URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_data: Option<String>,
    /// Extra free-text line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_text: Option<String>,
    /// Font size in points for the text lines.
    pub font_size: u32,
}

/// A reusable signing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureProfile {
    /// Stable identifier; built-ins use fixed ids.
    pub id: String,
    /// User-friendly name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: String,
    /// Invisible or visible.
    pub visibility: SignatureVisibility,
    /// Where to place the signature (meaningful only when visible).
    #[serde(default)]
    pub position: SignaturePosition,
    /// What the visible signature shows.
    #[serde(default)]
    pub appearance: AppearanceOptions,
    /// Default reason recorded in the signature.
    #[serde(default)]
    pub reason: String,
    /// Default location recorded in the signature.
    #[serde(default)]
    pub location: String,
    /// Default contact info recorded in the signature.
    #[serde(default)]
    pub contact_info: String,
    /// Whether this is the profile used when the caller names none.
    #[serde(default)]
    pub is_default: bool,
}

impl SignatureProfile {
    /// Whether this is one of the two built-in profiles.
    pub fn is_builtin(&self) -> bool {
        is_builtin_id(&self.id)
    }
}

fn is_builtin_id(id: &str) -> bool {
    id == DEFAULT_INVISIBLE_PROFILE_ID || id == DEFAULT_VISIBLE_PROFILE_ID
}

/// The built-in invisible profile.
pub fn default_invisible_profile() -> SignatureProfile {
    SignatureProfile {
        id: DEFAULT_INVISIBLE_PROFILE_ID.to_string(),
        name: "Invisible Signature".to_string(),
        description: "Digital signature without visible appearance".to_string(),
        visibility: SignatureVisibility::Invisible,
        position: SignaturePosition::default(),
        appearance: AppearanceOptions::default(),
        reason: "Document digitally signed".to_string(),
        location: "Digital Signature".to_string(),
        contact_info: String::new(),
        is_default: true,
    }
}

/// The built-in visible profile: signer name and timestamp, bottom-right of
/// the last page.
pub fn default_visible_profile() -> SignatureProfile {
    SignatureProfile {
        id: DEFAULT_VISIBLE_PROFILE_ID.to_string(),
        name: "Visible Signature".to_string(),
        description: "Visible signature with signer name and timestamp".to_string(),
        visibility: SignatureVisibility::Visible,
        position: SignaturePosition {
            page: 0, // last page
            x: 360.0,
            y: 50.0,
            width: DEFAULT_SIGNATURE_WIDTH,
            height: DEFAULT_SIGNATURE_HEIGHT,
        },
        appearance: AppearanceOptions {
            show_signer_name: true,
            show_signing_time: true,
            show_location: false,
            show_logo: false,
            logo_data: None,
            custom_text: None,
            font_size: 10,
        },
        reason: "Document digitally signed".to_string(),
        location: "Digital Signature".to_string(),
        contact_info: String::new(),
        is_default: false,
    }
}

/// Generate a fresh profile id.
pub fn new_profile_id() -> String {
    Uuid::new_v4().to_string()
}

/// Validate a profile before use or storage.
pub fn validate_profile(profile: &SignatureProfile) -> Result<()> {
    if profile.id.is_empty() {
        return Err(Error::InvalidProfile("profile id is required".to_string()));
    }
    if profile.name.is_empty() {
        return Err(Error::InvalidProfile("profile name is required".to_string()));
    }
    if profile.visibility == SignatureVisibility::Visible {
        if profile.position.width <= 0.0 || profile.position.height <= 0.0 {
            return Err(Error::InvalidProfile(format!(
                "visible signature must have positive width and height (got width={:.2}, height={:.2})",
                profile.position.width, profile.position.height
            )));
        }
        if profile.position.page < 0 {
            return Err(Error::InvalidProfile(format!(
                "visible signature must have a valid page number (got page={})",
                profile.position.page
            )));
        }
    }
    Ok(())
}

/// JSON-file-backed storage for signature profiles.
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// Create a store persisting under the given directory.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// All profiles: the two built-ins followed by stored custom profiles.
    pub fn list(&self) -> Vec<SignatureProfile> {
        let mut profiles = vec![default_invisible_profile(), default_visible_profile()];

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return profiles, // directory not created yet
        };
        let mut custom = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    warn!("skipping unreadable profile {}: {e}", path.display());
                    continue;
                }
            };
            match serde_json::from_slice::<SignatureProfile>(&data) {
                Ok(profile) if !profile.is_builtin() => custom.push(profile),
                Ok(_) => warn!("ignoring stored profile shadowing a built-in id"),
                Err(e) => warn!("skipping corrupt profile {}: {e}", path.display()),
            }
        }
        custom.sort_by(|a, b| a.name.cmp(&b.name));
        profiles.extend(custom);
        profiles
    }

    /// Look up a profile by id.
    pub fn get(&self, id: &str) -> Result<SignatureProfile> {
        self.list()
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::ProfileNotFound(id.to_string()))
    }

    /// The profile used when the caller names none.
    pub fn default_profile(&self) -> SignatureProfile {
        self.list()
            .into_iter()
            .find(|p| p.is_default)
            .unwrap_or_else(default_invisible_profile)
    }

    /// Persist a caller-created profile.
    pub fn save(&self, profile: &SignatureProfile) -> Result<()> {
        validate_profile(profile)?;
        if profile.is_builtin() {
            return Err(Error::BuiltinProfile(profile.id.clone()));
        }
        fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_vec_pretty(profile)
            .map_err(|e| Error::InvalidProfile(format!("profile is not serializable: {e}")))?;
        fs::write(self.profile_path(&profile.id), data)?;
        Ok(())
    }

    /// Delete a caller-created profile.
    pub fn delete(&self, id: &str) -> Result<()> {
        if is_builtin_id(id) {
            return Err(Error::BuiltinProfile(id.to_string()));
        }
        let path = self.profile_path(id);
        if !path.is_file() {
            return Err(Error::ProfileNotFound(id.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    fn profile_path(&self, id: &str) -> PathBuf {
        // Ids are uuids or fixed names; keep the file name inert anyway.
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles"));
        (dir, store)
    }

    fn custom_profile() -> SignatureProfile {
        SignatureProfile {
            id: new_profile_id(),
            name: "Contracts".to_string(),
            description: String::new(),
            visibility: SignatureVisibility::Visible,
            position: SignaturePosition {
                page: 1,
                x: 50.0,
                y: 50.0,
                width: 180.0,
                height: 60.0,
            },
            appearance: AppearanceOptions {
                show_signer_name: true,
                show_signing_time: true,
                ..AppearanceOptions::default()
            },
            reason: "Contract approval".to_string(),
            location: "Madrid".to_string(),
            contact_info: String::new(),
            is_default: false,
        }
    }

    #[test]
    fn test_builtins_are_always_present() {
        let (_dir, store) = store();
        let profiles = store.list();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].id, DEFAULT_INVISIBLE_PROFILE_ID);
        assert_eq!(profiles[1].id, DEFAULT_VISIBLE_PROFILE_ID);
        assert_eq!(store.default_profile().id, DEFAULT_INVISIBLE_PROFILE_ID);
    }

    #[test]
    fn test_save_get_delete_round_trip() {
        let (_dir, store) = store();
        let profile = custom_profile();
        store.save(&profile).unwrap();

        let loaded = store.get(&profile.id).unwrap();
        assert_eq!(loaded, profile);
        assert_eq!(store.list().len(), 3);

        store.delete(&profile.id).unwrap();
        assert!(matches!(store.get(&profile.id), Err(Error::ProfileNotFound(_))));
    }

    #[test]
    fn test_builtin_profiles_cannot_be_deleted_or_overwritten() {
        let (_dir, store) = store();
        let err = store.delete(DEFAULT_INVISIBLE_PROFILE_ID).unwrap_err();
        assert!(matches!(err, Error::BuiltinProfile(_)));

        let mut shadow = default_visible_profile();
        shadow.name = "Evil twin".to_string();
        let err = store.save(&shadow).unwrap_err();
        assert!(matches!(err, Error::BuiltinProfile(_)));
    }

    #[test]
    fn test_delete_unknown_profile_is_not_found() {
        let (_dir, store) = store();
        let err = store.delete("no-such-profile").unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound(_)));
    }

    #[test]
    fn test_validate_rejects_degenerate_visible_profiles() {
        let mut profile = custom_profile();
        profile.position.width = 0.0;
        assert!(matches!(
            validate_profile(&profile),
            Err(Error::InvalidProfile(_))
        ));

        let mut profile = custom_profile();
        profile.name.clear();
        assert!(matches!(
            validate_profile(&profile),
            Err(Error::InvalidProfile(_))
        ));
    }

    #[test]
    fn test_builtin_profiles_validate() {
        validate_profile(&default_invisible_profile()).unwrap();
        validate_profile(&default_visible_profile()).unwrap();
    }

    #[test]
    fn test_corrupt_stored_profile_is_skipped() {
        let (_dir, store) = store();
        let profile = custom_profile();
        store.save(&profile).unwrap();
        fs::write(store.dir.join("broken.json"), b"{ not json").unwrap();
        assert_eq!(store.list().len(), 3);
    }
}
