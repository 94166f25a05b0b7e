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


//! AES-256-CBC decryption as used by Readium LCP
//!
//! # Blob Layout
//! - Bytes 0..16: initialization vector
//! - Bytes 16..: ciphertext, a whole number of 16-byte blocks
//!
//! # Padding
//! LCP pads with PKCS#7, but the padding is removed leniently: the last
//! plaintext byte is taken as the padding length and only checked against the
//! plaintext length. Padding bytes themselves are not inspected.

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};

use crate::error::{LcpError, Result};

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size, which is also the IV size.
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key size.
pub const KEY_SIZE: usize = 32;

/// Decrypt an `IV || ciphertext` blob and strip its padding.
///
/// An empty blob decrypts to an empty result.
///
/// # Errors
/// - InvalidKeyLength if `key` is not 32 bytes
/// - MalformedCiphertext if the blob is shorter than one IV plus one block, or
///   not block aligned
/// - InvalidPadding if the padding length exceeds the plaintext length
pub fn decipher_aes256_cbc(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(LcpError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }

    if data.is_empty() {
        return Ok(Vec::new());
    }

    if data.len() < BLOCK_SIZE {
        return Err(LcpError::MalformedCiphertext(format!(
            "{} bytes is shorter than the {}-byte IV",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let (iv, ciphertext) = data.split_at(BLOCK_SIZE);

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(LcpError::MalformedCiphertext(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_SIZE
        )));
    }

    let decryptor = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| {
        LcpError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        }
    })?;

    let mut plaintext = ciphertext.to_vec();
    decryptor
        .decrypt_padded_mut::<NoPadding>(&mut plaintext)
        .map_err(|_| LcpError::MalformedCiphertext("block decryption failed".to_string()))?;

    let padding = usize::from(plaintext[plaintext.len() - 1]);
    if padding > plaintext.len() {
        return Err(LcpError::InvalidPadding {
            padding,
            length: plaintext.len(),
        });
    }

    plaintext.truncate(plaintext.len() - padding);
    Ok(plaintext)
}
