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


//! LCP license document and content key recovery
//!
//! # License Document (`META-INF/license.lcpl`)
//! A JSON document; only the parts below are consumed:
//! ```json
//! {
//!   "id": "book-42",
//!   "provider": "https://bookstore.example",
//!   "encryption": {
//!     "profile": "http://readium.org/lcp/basic-profile",
//!     "content_key": { "encrypted_value": "<base64>" },
//!     "user_key": { "key_check": "<base64>" }
//!   }
//! }
//! ```
//!
//! # Key Recovery Flow
//! 1. Decode and decrypt `key_check` with the user key
//! 2. Compare it with `id`; a mismatch means the user key is wrong
//! 3. Decode and decrypt `encrypted_value` with the user key: that is the content key
//!
//! Signatures, rights and status links are not checked.

use std::io::Read;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::cbc::decipher_aes256_cbc;
use crate::crypto::user_key::UserKey;
use crate::error::{LcpError, Result};

/// Path of the license inside an EPUB container
pub const LICENSE_PATH: &str = "META-INF/license.lcpl";

/// Parsed LCP license
#[derive(Debug, Clone, Deserialize)]
pub struct License {
    /// License identifier; the decrypted key check must equal it
    #[serde(rename = "id")]
    pub id: String,

    /// Bookstore that issued the license
    #[serde(rename = "provider", default)]
    pub provider: Option<String>,

    /// Issue timestamp (RFC 3339), kept as text
    #[serde(rename = "issued", default)]
    pub issued: Option<String>,

    /// Last update timestamp (RFC 3339), kept as text
    #[serde(rename = "updated", default)]
    pub updated: Option<String>,

    #[serde(rename = "encryption")]
    pub encryption: LicenseEncryption,
}

/// `encryption` object of the license
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseEncryption {
    /// Encryption profile URI (e.g. the LCP basic profile)
    #[serde(rename = "profile", default)]
    pub profile: Option<String>,

    #[serde(rename = "content_key")]
    pub content_key: EncryptedContentKey,

    #[serde(rename = "user_key")]
    pub user_key: UserKeyCheck,
}

/// Content key wrapped with the user key
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptedContentKey {
    /// `IV || ciphertext`, base64 encoded
    #[serde(rename = "encrypted_value")]
    pub encrypted_value: String,
}

/// Value used to verify the user key
#[derive(Debug, Clone, Deserialize)]
pub struct UserKeyCheck {
    /// License id encrypted with the user key, base64 encoded
    #[serde(rename = "key_check")]
    pub key_check: String,
}

/// Symmetric key that decrypts the book's protected resources
///
/// Never leaves memory and is wiped when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey(Vec<u8>);

impl ContentKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentKey({} bytes)", self.0.len())
    }
}

impl License {
    /// Parse a license from a reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parse a license from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decrypt the key check and compare it with the license id
    ///
    /// # Errors
    /// - InvalidBase64 if `key_check` is not valid base64
    /// - Crypto errors from AES-256-CBC
    /// - KeyMismatch if the user key is not the one this license was issued for
    pub fn verify_user_key(&self, user_key: &UserKey) -> Result<()> {
        let encrypted = decode_field("key_check", &self.encryption.user_key.key_check)?;
        let key_check = decipher_aes256_cbc(&encrypted, user_key.as_bytes())?;

        if key_check != self.id.as_bytes() {
            return Err(LcpError::KeyMismatch {
                license_id: self.id.clone(),
            });
        }

        Ok(())
    }

    /// Recover the content key with the user key
    ///
    /// The key check is always verified first; the content key is never
    /// decrypted with a key that failed it.
    pub fn content_key(&self, user_key: &UserKey) -> Result<ContentKey> {
        self.verify_user_key(user_key)?;
        debug!(license_id = %self.id, "user key matches license");

        let encrypted = decode_field(
            "encrypted_value",
            &self.encryption.content_key.encrypted_value,
        )?;
        let content_key = decipher_aes256_cbc(&encrypted, user_key.as_bytes())?;

        Ok(ContentKey(content_key))
    }
}

impl std::str::FromStr for License {
    type Err = LcpError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|source| LcpError::InvalidBase64 { field, source })
}
