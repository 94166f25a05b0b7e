// LCP Core - Readium LCP removal for EPUB books
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! User key parsing and management
//!
//! # What is the User Key?
//! - 32-byte AES-256 key belonging to the reader, not to the book
//! - Unwraps the content key stored in the book's license
//! - Handed out by the bookstore's reading app, usually as 64 hex characters
//! - Obtaining it is out of scope for this crate; we only consume it
//!
//! # Storage
//! - Held in memory for one decrypt operation
//! - Zeroized on drop
//! - Never logged or written to the output

use crate::error::{LcpError, Result};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a user key in bytes (AES-256)
pub const USER_KEY_LEN: usize = 32;

/// Newtype wrapper around the user key to provide type safety
///
/// Construction guarantees the key is exactly [`USER_KEY_LEN`] bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct UserKey([u8; USER_KEY_LEN]);

impl UserKey {
    /// Create a UserKey from a 32-byte array
    pub fn new(bytes: [u8; USER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a user key from its hex representation
    ///
    /// # Errors
    /// - InvalidUserKey if the string is not 64 hex characters
    pub fn from_hex(hex: &str) -> Result<Self> {
        parse_user_key(hex).map(Self)
    }

    /// Create a UserKey from a byte slice
    ///
    /// # Errors
    /// - InvalidUserKey if the slice is not 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; USER_KEY_LEN] = bytes.try_into().map_err(|_| {
            LcpError::InvalidUserKey(format!(
                "Expected {} bytes, got {}",
                USER_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; USER_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UserKey(..)")
    }
}

/// Parse a hex string into a 32-byte key
///
/// # Format Rules
/// - Must be exactly 64 characters (32 bytes)
/// - Only valid hex digits (0-9, A-F, a-f)
/// - Whitespace is trimmed
/// - Case-insensitive
///
/// # Example
/// ```
/// use lcp_core::crypto::user_key::parse_user_key;
///
/// let key = parse_user_key(&"ab".repeat(32)).unwrap();
/// assert_eq!(key, [0xAB; 32]);
/// ```
pub fn parse_user_key(hex: &str) -> Result<[u8; USER_KEY_LEN]> {
    let hex = hex.trim();

    if hex.is_empty() {
        return Err(LcpError::InvalidUserKey("user key not specified".to_string()));
    }

    if hex.len() != USER_KEY_LEN * 2 {
        return Err(LcpError::InvalidUserKey(format!(
            "Expected {} hex characters, got {}",
            USER_KEY_LEN * 2,
            hex.len()
        )));
    }

    let mut bytes = [0u8; USER_KEY_LEN];
    hex::decode_to_slice(hex, &mut bytes)
        .map_err(|e| LcpError::InvalidUserKey(format!("Invalid hex characters: {}", e)))?;

    Ok(bytes)
}
