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


//! Cryptography and DRM removal
//!
//! This module holds the primitives needed to lift Readium LCP protection:
//! the reader's user key, AES-256-CBC with LCP's padding rules, and the
//! algorithms a protected resource can be declared with.
//!
//! # Key Hierarchy
//! - **User key**: belongs to the reader, unwraps the content key
//! - **Content key**: belongs to the book, decrypts its resources
//!
//! See [`crate::lcp::license`] for how one turns into the other.

pub mod algorithm;
pub mod cbc;
pub mod user_key;

pub use algorithm::{EncryptionAlgorithm, AES256_CBC_URI, FONT_OBFUSCATION_URI};
pub use cbc::decipher_aes256_cbc;
pub use user_key::{parse_user_key, UserKey, USER_KEY_LEN};
