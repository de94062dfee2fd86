//! Pagination cursors
//!
//! A cursor is URL-safe base64 (no padding) of `{"v":1,"o":offset,"f":fingerprint}`.
//! The fingerprint binds the cursor to the query that produced it, so a
//! cursor replayed against a different query is detected and ignored.

use crate::error::{QueryError, Result};
use crate::validation::NormalizedQuery;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const CURSOR_VERSION: u32 = 1;
/// Hex characters of the SHA-256 digest kept in a cursor
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "v")]
    pub version: u32,
    #[serde(rename = "o")]
    pub offset: usize,
    #[serde(rename = "f")]
    pub fingerprint: String,
}

/// Digest of the normalized query (text, identifiers, agencies, date range)
pub fn fingerprint(query: &NormalizedQuery) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.canonical().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

impl Cursor {
    pub fn new(offset: usize, fingerprint: String) -> Self {
        Self {
            version: CURSOR_VERSION,
            offset,
            fingerprint,
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| QueryError::InvalidCursor(format!("not base64: {}", e)))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|e| QueryError::InvalidCursor(format!("malformed payload: {}", e)))?;
        if cursor.version != CURSOR_VERSION {
            return Err(QueryError::InvalidCursor(format!(
                "unsupported version {}",
                cursor.version
            )));
        }
        Ok(cursor)
    }

    /// Offset to resume at for `expected_fingerprint`
    pub fn resume(token: &str, expected_fingerprint: &str) -> Result<usize> {
        let cursor = Self::decode(token)?;
        if cursor.fingerprint != expected_fingerprint {
            return Err(QueryError::InvalidCursor("issued for a different query".to_string()));
        }
        // Offsets are bound as SQLite integers
        if i64::try_from(cursor.offset).is_err() {
            return Err(QueryError::InvalidCursor(format!("offset {} out of range", cursor.offset)));
        }
        Ok(cursor.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reads_encoded_cursor() {
        let token = Cursor::new(40, "abcdef0123456789".to_string()).encode();
        assert!(!token.contains('='));
        assert_eq!(Cursor::resume(&token, "abcdef0123456789").unwrap(), 40);
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(Cursor::decode("%%%"), Err(QueryError::InvalidCursor(_))));
        let not_json = URL_SAFE_NO_PAD.encode("hello");
        assert!(matches!(Cursor::decode(&not_json), Err(QueryError::InvalidCursor(_))));
    }

    #[test]
    fn test_foreign_fingerprint_is_invalid() {
        let token = Cursor::new(20, "aaaaaaaaaaaaaaaa".to_string()).encode();
        assert!(Cursor::resume(&token, "bbbbbbbbbbbbbbbb").is_err());
    }

    #[test]
    fn test_offset_past_i64_is_invalid() {
        let token = Cursor::new(usize::MAX, "aaaaaaaaaaaaaaaa".to_string()).encode();
        assert!(matches!(
            Cursor::resume(&token, "aaaaaaaaaaaaaaaa"),
            Err(QueryError::InvalidCursor(_))
        ));

        let token = Cursor::new(i64::MAX as usize, "aaaaaaaaaaaaaaaa".to_string()).encode();
        assert_eq!(Cursor::resume(&token, "aaaaaaaaaaaaaaaa").unwrap(), i64::MAX as usize);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let query = NormalizedQuery {
            text: Some("space heater".to_string()),
            ..Default::default()
        };
        assert_eq!(fingerprint(&query), fingerprint(&query.clone()));
        assert_eq!(fingerprint(&query).len(), FINGERPRINT_LEN);

        let other = NormalizedQuery {
            text: Some("baby walker".to_string()),
            ..Default::default()
        };
        assert_ne!(fingerprint(&query), fingerprint(&other));
    }
}
