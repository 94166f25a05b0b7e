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


//! Readium LCP documents
//!
//! An LCP-protected EPUB carries two documents next to its content:
//! - `META-INF/license.lcpl`: the license, holding the wrapped content key
//!   (it may also be delivered separately from the book)
//! - `META-INF/encryption.xml`: the manifest listing every protected resource
//!   and how it was encrypted

pub mod encryption;
pub mod license;

pub use encryption::{
    decode_path, parse_encryption_xml, EncryptionPolicies, FileEntry, ENCRYPTION_PATH,
};
pub use license::{ContentKey, License, LICENSE_PATH};
