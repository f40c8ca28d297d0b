//! Registration intake: turns operator input into a validated [`RegistrationRequest`].
//!
//! Bulk uploads encode the identity in the file name (`<roll>_<name>.<ext>` or
//! `<roll>.<ext>`); that parsing lives here, away from the registry.

use crate::types::Identity;
use std::path::Path;
use thiserror::Error;

/// Image file extensions accepted for registration (lowercase).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    #[error("roll number is empty")]
    EmptyRoll,
    #[error("invalid roll number {0:?}: no whitespace or path separators allowed")]
    InvalidRoll(String),
    #[error("name is empty")]
    EmptyName,
    #[error("file name {0:?} has no extension")]
    MissingExtension(String),
    #[error("unsupported image extension {0:?} (expected jpg, jpeg or png)")]
    UnsupportedExtension(String),
    #[error("cannot derive an identity from file name {0:?}")]
    MalformedFileName(String),
}

/// Structured registration input: who, and the raw uploaded image bytes.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub identity: Identity,
    pub image: Vec<u8>,
    /// Where the request came from (file name or "upload"), for reporting.
    pub source: String,
}

impl RegistrationRequest {
    pub fn new(roll: &str, name: &str, image: Vec<u8>) -> Result<Self, IntakeError> {
        Ok(Self {
            identity: Identity::new(roll, name)?,
            image,
            source: "upload".to_string(),
        })
    }

    /// Build a request from a named image blob, deriving the identity from the file name.
    pub fn from_named_blob(file_name: &str, image: Vec<u8>) -> Result<Self, IntakeError> {
        Ok(Self {
            identity: identity_from_file_name(file_name)?,
            image,
            source: file_name.to_string(),
        })
    }
}

/// Parse `<roll>_<name>.<ext>` or `<roll>.<ext>`.
///
/// Only the last path component is considered. The roll is everything before
/// the first underscore; remaining underscores in the name become spaces.
/// Without a name part the roll doubles as the name.
pub fn identity_from_file_name(file_name: &str) -> Result<Identity, IntakeError> {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IntakeError::MalformedFileName(file_name.to_string()))?;

    let (stem, ext) = base
        .rsplit_once('.')
        .ok_or_else(|| IntakeError::MissingExtension(base.to_string()))?;

    let ext = ext.to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(IntakeError::UnsupportedExtension(ext));
    }

    match stem.split_once('_') {
        Some((roll, name)) => Identity::new(roll, &name.replace('_', " ")),
        None => Identity::new(stem, stem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_and_name() {
        let id = identity_from_file_name("101_Alice.jpg").unwrap();
        assert_eq!(id.roll, "101");
        assert_eq!(id.name, "Alice");
    }

    #[test]
    fn test_name_underscores_become_spaces() {
        let id = identity_from_file_name("uploads/2024-17_Mary_Jane_Watson.PNG").unwrap();
        assert_eq!(id.roll, "2024-17");
        assert_eq!(id.name, "Mary Jane Watson");
    }

    #[test]
    fn test_roll_only_uses_roll_as_name() {
        let id = identity_from_file_name("205.jpeg").unwrap();
        assert_eq!(id.roll, "205");
        assert_eq!(id.name, "205");
    }

    #[test]
    fn test_malformed_names() {
        assert_eq!(
            identity_from_file_name("101_Alice"),
            Err(IntakeError::MissingExtension("101_Alice".into()))
        );
        assert_eq!(
            identity_from_file_name("101_Alice.gif"),
            Err(IntakeError::UnsupportedExtension("gif".into()))
        );
        assert_eq!(identity_from_file_name("_Alice.jpg"), Err(IntakeError::EmptyRoll));
        assert_eq!(identity_from_file_name("101_.jpg"), Err(IntakeError::EmptyName));
        assert_eq!(identity_from_file_name(".jpg"), Err(IntakeError::EmptyRoll));
        assert!(matches!(
            identity_from_file_name("1 01_Alice.jpg"),
            Err(IntakeError::InvalidRoll(_))
        ));
        assert!(matches!(
            identity_from_file_name(".."),
            Err(IntakeError::MalformedFileName(_))
        ));
    }

    #[test]
    fn test_request_from_named_blob_keeps_source() {
        let req = RegistrationRequest::from_named_blob("101_Alice.jpg", vec![1, 2, 3]).unwrap();
        assert_eq!(req.source, "101_Alice.jpg");
        assert_eq!(req.identity.roll, "101");
        assert_eq!(req.image, vec![1, 2, 3]);
    }
}
