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


//! LCP-protected EPUB decryption
//!
//! # Decryption Process
//! 1. Open the source archive
//! 2. Read the license: the one supplied by the caller, else the embedded
//!    `META-INF/license.lcpl`
//! 3. Verify the user key against the license and unwrap the content key
//! 4. Parse `META-INF/encryption.xml` into per-path policies
//! 5. Rewrite the archive entry by entry (see [`transcoder`])
//!
//! Steps 2-4 finish before any protected resource is read, so a wrong key or
//! an unsupported algorithm fails without touching the content.

pub mod transcoder;

use std::io::{BufReader, Read, Seek, Write};

use tracing::info;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::crypto::user_key::UserKey;
use crate::error::{LcpError, Result};
use crate::lcp::encryption::{parse_encryption_xml, EncryptionPolicies, FileEntry, ENCRYPTION_PATH};
use crate::lcp::license::{License, LICENSE_PATH};

pub use transcoder::{
    decrypt_entry, EntryAction, EntryProgress, TranscodeSummary, Transcoder, EPUB_MIMETYPE,
    MIMETYPE_PATH,
};

/// EPUB decrypter bound to one user key
///
/// # Example
/// ```no_run
/// use lcp_core::epub::EpubDecrypter;
/// use std::fs::File;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let decrypter = EpubDecrypter::from_hex(
///     "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
/// )?;
/// let input = File::open("book.epub")?;
/// let output = File::create("book.plain.epub")?;
/// decrypter.decrypt(input, output)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EpubDecrypter {
    user_key: UserKey,
    license: Option<License>,
}

impl EpubDecrypter {
    pub fn new(user_key: UserKey) -> Self {
        Self {
            user_key,
            license: None,
        }
    }

    /// Create a decrypter from a hex-encoded user key
    pub fn from_hex(user_key_hex: &str) -> Result<Self> {
        Ok(Self::new(UserKey::from_hex(user_key_hex)?))
    }

    /// Use a license delivered separately from the book
    ///
    /// When set, the embedded `META-INF/license.lcpl` is ignored.
    pub fn with_license(mut self, license: License) -> Self {
        self.license = Some(license);
        self
    }

    /// Decrypt an EPUB from `source` into `destination`
    ///
    /// Returns the destination once the archive has been finalized.
    pub fn decrypt<R, W>(&self, source: R, destination: W) -> Result<W>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        self.decrypt_with_progress(source, destination, |_| {})
    }

    /// Decrypt an EPUB, reporting every written entry to `progress`
    pub fn decrypt_with_progress<R, W, F>(&self, source: R, destination: W, progress: F) -> Result<W>
    where
        R: Read + Seek,
        W: Write + Seek,
        F: FnMut(&EntryProgress<'_>),
    {
        let mut archive =
            ZipArchive::new(source).map_err(|e| LcpError::archive("opening input archive", e))?;

        let license = match &self.license {
            Some(license) => license.clone(),
            None => read_license(&mut archive)?,
        };
        info!(
            license_id = %license.id,
            provider = license.provider.as_deref().unwrap_or("unknown"),
            "decrypting EPUB"
        );

        let content_key = license.content_key(&self.user_key)?;
        let policies = EncryptionPolicies::from_entries(read_manifest(&mut archive)?);

        let (destination, summary) =
            Transcoder::new(&content_key, &policies).transcode(&mut archive, destination, progress)?;

        info!(
            decrypted = summary.decrypted,
            copied = summary.copied,
            directories = summary.directories,
            "decrypted EPUB"
        );
        Ok(destination)
    }
}

/// License and manifest of a protected EPUB, read without any key
#[derive(Debug, Clone)]
pub struct BookInfo {
    pub license: License,
    /// Protected resources in manifest order
    pub entries: Vec<FileEntry>,
}

/// Read the license and encryption manifest of an EPUB
///
/// `license` overrides the embedded license, as in [`EpubDecrypter::with_license`].
pub fn inspect<R: Read + Seek>(source: R, license: Option<License>) -> Result<BookInfo> {
    let mut archive =
        ZipArchive::new(source).map_err(|e| LcpError::archive("opening input archive", e))?;

    let license = match license {
        Some(license) => license,
        None => read_license(&mut archive)?,
    };
    let entries = read_manifest(&mut archive)?;

    Ok(BookInfo { license, entries })
}

/// Decrypt a whole EPUB held in memory
pub fn decrypt_bytes(input: &[u8], user_key_hex: &str) -> Result<Vec<u8>> {
    let decrypter = EpubDecrypter::from_hex(user_key_hex)?;
    let output = decrypter.decrypt(
        std::io::Cursor::new(input),
        std::io::Cursor::new(Vec::new()),
    )?;
    Ok(output.into_inner())
}

fn read_license<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<License> {
    let file = archive
        .by_name(LICENSE_PATH)
        .map_err(|e| missing_or_archive(LICENSE_PATH, e))?;
    License::from_reader(file)
}

fn read_manifest<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<FileEntry>> {
    let file = archive
        .by_name(ENCRYPTION_PATH)
        .map_err(|e| missing_or_archive(ENCRYPTION_PATH, e))?;
    parse_encryption_xml(BufReader::new(file))
}

fn missing_or_archive(name: &str, err: ZipError) -> LcpError {
    match err {
        ZipError::FileNotFound => LcpError::MissingEntry(name.to_string()),
        other => LcpError::archive(format!("opening {}", name), other),
    }
}
