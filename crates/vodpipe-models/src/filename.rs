//! Object-key contract validation.
//!
//! Uploaded objects are named `owner###title.ext`, optionally under a
//! directory prefix. The validator is the security boundary between the
//! bucket and everything downstream: a key is rejected before any
//! download, launch or status write if it carries control characters,
//! traversal sequences, characters outside the allow-list, or lacks the
//! separator in its final path segment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::video::VideoId;

/// Separator between owner and title in the final path segment.
pub const SEPARATOR: &str = "###";

/// Reasons a key is permanently rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Key is not valid percent-encoded UTF-8: {0}")]
    InvalidEncoding(String),

    #[error("Key contains control character U+{0:04X}")]
    ControlCharacter(u32),

    #[error("Key contains a parent-directory traversal sequence")]
    PathTraversal,

    #[error("Key contains disallowed character {0:?}")]
    DisallowedCharacter(char),

    #[error("Filename {0:?} does not contain the '###' separator")]
    MissingSeparator(String),
}

/// Owner and title extracted from a valid key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilenameIdentity {
    /// Tenant identifier (text before the first separator)
    pub owner: String,
    /// Base name, still carrying its file extension
    pub title: String,
}

impl FilenameIdentity {
    /// Title with its final extension removed.
    ///
    /// Dotfiles such as `.hidden` keep their name.
    pub fn title_stem(&self) -> &str {
        match self.title.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.title,
        }
    }

    /// Video identifier `owner###stem-disambiguator`.
    pub fn video_id(&self, disambiguator: i64) -> VideoId {
        VideoId(format!(
            "{}{}{}-{}",
            self.owner,
            SEPARATOR,
            self.title_stem(),
            disambiguator
        ))
    }
}

/// Decode a URL-escaped object key as found in storage notifications.
///
/// `+` is normalized to a space before percent-decoding.
pub fn decode_object_key(raw: &str) -> Result<String, ValidationError> {
    let normalized = raw.replace('+', " ");
    urlencoding::decode(&normalized)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ValidationError::InvalidEncoding(e.to_string()))
}

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | 'ـ' | '_' | '.' | '/' | '#')
}

/// Validate a decoded key and extract its identity.
///
/// Rules are applied in order: control characters and traversal
/// sequences, then the character allow-list, then the separator in the
/// final path segment. The first separator splits owner from title.
pub fn validate_key(key: &str) -> Result<FilenameIdentity, ValidationError> {
    if let Some(c) = key.chars().find(|c| (*c as u32) < 0x20) {
        return Err(ValidationError::ControlCharacter(c as u32));
    }
    if key.contains("../") || key.contains("..\\") {
        return Err(ValidationError::PathTraversal);
    }

    if let Some(c) = key.chars().find(|c| !is_allowed(*c)) {
        return Err(ValidationError::DisallowedCharacter(c));
    }

    let filename = key.rsplit('/').next().unwrap_or(key);
    let (owner, title) = filename
        .split_once(SEPARATOR)
        .ok_or_else(|| ValidationError::MissingSeparator(filename.to_string()))?;

    Ok(FilenameIdentity {
        owner: owner.to_string(),
        title: title.to_string(),
    })
}
