//! Version tokens.
//!
//! A [`VersionId`] names one archived revision of one file. The sender picks it
//! when a change leaves the machine, every receiver stores the payload under
//! it, and the archive uses it verbatim as a file name. It must therefore be
//! unique across senders and safe as a path component on every platform.

use std::fmt;

use super::constants::{MAX_VERSION_TOKEN_LEN, VERSION_FILE_SUFFIX};
use super::error::VersionError;

/// Opaque, filesystem-safe identifier of one archived revision.
///
/// Tokens produced by [`VersionId::generate`] are UUIDv7 values in simple
/// (32 hex digit) form: time-ordered, so tokens from one sender sort in send
/// order, with random bits so concurrent senders do not collide. Tokens
/// received from the wire are accepted as-is once validated, which keeps
/// peers that still send timestamp tokens such as `1700000000.123456`
/// interoperable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId(String);

impl VersionId {
    /// Validate a token received from the wire or read back from disk.
    ///
    /// Accepted characters are ASCII alphanumerics, `.`, `_` and `-`. The
    /// tokens `.` and `..` are rejected.
    pub fn parse(token: &str) -> Result<Self, VersionError> {
        if token.is_empty() {
            return Err(VersionError::Empty);
        }
        if token.len() > MAX_VERSION_TOKEN_LEN {
            return Err(VersionError::TooLong {
                len: token.len(),
                limit: MAX_VERSION_TOKEN_LEN,
            });
        }
        if token == "." || token == ".." {
            return Err(VersionError::Reserved(token.to_string()));
        }
        if !token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(VersionError::InvalidCharacter(token.to_string()));
        }
        Ok(Self(token.to_string()))
    }

    /// Generate a fresh token for an outgoing change.
    #[cfg(feature = "sync")]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    /// The token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the archived payload for this token.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, VERSION_FILE_SUFFIX)
    }

    /// Recover a token from an archive file name, if it is one.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(VERSION_FILE_SUFFIX)?.strip_suffix('.')?;
        Self::parse(stem).ok()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_legacy_timestamp() {
        let v = VersionId::parse("1700000000.123456").unwrap();
        assert_eq!(v.as_str(), "1700000000.123456");
    }

    #[test]
    fn test_parse_rejects_unsafe_tokens() {
        assert_eq!(VersionId::parse(""), Err(VersionError::Empty));
        assert!(matches!(VersionId::parse(".."), Err(VersionError::Reserved(_))));
        assert!(matches!(
            VersionId::parse("a/b"),
            Err(VersionError::InvalidCharacter(_))
        ));
        assert!(matches!(
            VersionId::parse("a b"),
            Err(VersionError::InvalidCharacter(_))
        ));
        let long = "a".repeat(MAX_VERSION_TOKEN_LEN + 1);
        assert!(matches!(VersionId::parse(&long), Err(VersionError::TooLong { .. })));
    }

    #[test]
    fn test_file_name_roundtrip() {
        let v = VersionId::parse("0190a1b2c3d4").unwrap();
        assert_eq!(v.file_name(), "0190a1b2c3d4.version");
        assert_eq!(VersionId::from_file_name(&v.file_name()), Some(v));
        assert_eq!(VersionId::from_file_name("notes.txt"), None);
        assert_eq!(VersionId::from_file_name(".version"), None);
    }

    #[cfg(feature = "sync")]
    #[test]
    fn test_generate_is_unique_and_safe() {
        let a = VersionId::generate();
        let b = VersionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(VersionId::parse(a.as_str()).is_ok());
    }
}
