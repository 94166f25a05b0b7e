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


//! Entry-by-entry rewrite of a protected EPUB into a plain one
//!
//! # Output Rules
//! 1. The source archive comment is copied verbatim
//! 2. `mimetype` is written first and stored uncompressed, because many
//!    readers sniff the first local header instead of reading the central
//!    directory
//! 3. `META-INF/encryption.xml`, `META-INF/license.lcpl` and the source
//!    `mimetype` are dropped
//! 4. Every other entry keeps its name, position, timestamp and permissions.
//!    Directories get no data; protected resources are decrypted (and
//!    inflated when the manifest says so); the rest is copied byte for byte
//! 5. The central directory is written last

use std::io::{self, Read, Seek, Write};

use flate2::read::DeflateDecoder;
use tracing::{debug, trace};
use zip::read::ZipFile;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{LcpError, Result};
use crate::lcp::encryption::{EncryptionPolicies, FileEntry, ENCRYPTION_PATH};
use crate::lcp::license::{ContentKey, LICENSE_PATH};

/// Name of the EPUB mimetype entry
pub const MIMETYPE_PATH: &str = "mimetype";

/// Content of the mimetype entry
pub const EPUB_MIMETYPE: &str = "application/epub+zip";

/// Source entries that are consumed or replaced and never copied
const DROPPED_ENTRIES: [&str; 3] = [ENCRYPTION_PATH, LICENSE_PATH, MIMETYPE_PATH];

/// What happened to a source entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    Decrypted,
    Copied,
    Directory,
}

/// Progress event, emitted once per written entry
#[derive(Debug, Clone, Copy)]
pub struct EntryProgress<'a> {
    /// Position of the entry in the source archive
    pub index: usize,
    /// Number of entries in the source archive
    pub total: usize,
    pub name: &'a str,
    pub action: EntryAction,
}

/// Counters for one transcoding pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeSummary {
    pub decrypted: usize,
    pub copied: usize,
    pub directories: usize,
    pub dropped: usize,
}

/// Rewrites a source archive using a content key and the manifest's policies
pub struct Transcoder<'a> {
    content_key: &'a ContentKey,
    policies: &'a EncryptionPolicies,
}

impl<'a> Transcoder<'a> {
    pub fn new(content_key: &'a ContentKey, policies: &'a EncryptionPolicies) -> Self {
        Self {
            content_key,
            policies,
        }
    }

    /// Write the decrypted copy of `source` into `destination`
    ///
    /// Returns the finished destination. On error the destination holds a
    /// partial archive; what to do with it is up to the caller.
    pub fn transcode<R, W, F>(
        &self,
        source: &mut ZipArchive<R>,
        destination: W,
        mut progress: F,
    ) -> Result<(W, TranscodeSummary)>
    where
        R: Read + Seek,
        W: Write + Seek,
        F: FnMut(&EntryProgress<'_>),
    {
        let mut writer = ZipWriter::new(destination);
        let mut summary = TranscodeSummary::default();

        writer.set_raw_comment(source.comment().to_vec());
        write_mimetype(&mut writer)?;

        let total = source.len();
        for index in 0..total {
            let name = source
                .by_index_raw(index)
                .map_err(|e| LcpError::archive(format!("reading header of entry #{}", index), e))?
                .name()
                .to_string();
            let mut file = source
                .by_index(index)
                .map_err(|e| LcpError::archive("opening entry", e).in_entry(&name))?;

            if DROPPED_ENTRIES.contains(&name.as_str()) {
                trace!(entry = %name, "dropping entry");
                summary.dropped += 1;
                continue;
            }

            let action = self
                .transcode_entry(&mut file, &name, &mut writer)
                .map_err(|e| e.in_entry(&name))?;

            match action {
                EntryAction::Decrypted => summary.decrypted += 1,
                EntryAction::Copied => summary.copied += 1,
                EntryAction::Directory => summary.directories += 1,
            }

            debug!(entry = %name, ?action, "processed entry");
            progress(&EntryProgress {
                index,
                total,
                name: &name,
                action,
            });
        }

        let destination = writer.finish().map_err(LcpError::Finalize)?;
        Ok((destination, summary))
    }

    fn transcode_entry<W: Write + Seek>(
        &self,
        file: &mut ZipFile<'_>,
        name: &str,
        writer: &mut ZipWriter<W>,
    ) -> Result<EntryAction> {
        let options = entry_options(file);

        if name.ends_with('/') {
            writer
                .add_directory(name, options)
                .map_err(|e| LcpError::archive("adding directory", e))?;
            return Ok(EntryAction::Directory);
        }

        writer
            .start_file(name, options)
            .map_err(|e| LcpError::archive("creating output entry", e))?;

        match self.policies.get(name) {
            Some(entry) => {
                let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
                file.read_to_end(&mut data)
                    .map_err(|e| LcpError::io("reading entry", e))?;

                let plaintext = decrypt_entry(&data, self.content_key, entry)?;
                writer
                    .write_all(&plaintext)
                    .map_err(|e| LcpError::io("writing entry", e))?;
                Ok(EntryAction::Decrypted)
            }
            None => {
                io::copy(file, writer).map_err(|e| LcpError::io("copying entry", e))?;
                Ok(EntryAction::Copied)
            }
        }
    }
}

/// Decrypt one protected resource and inflate it if it was compressed
pub fn decrypt_entry(data: &[u8], content_key: &ContentKey, entry: &FileEntry) -> Result<Vec<u8>> {
    let plaintext = entry.algorithm.decipher(data, content_key.as_bytes())?;

    if entry.is_compressed {
        inflate(&plaintext)
    } else {
        Ok(plaintext)
    }
}

/// Inflate raw DEFLATE data (no zlib or gzip header)
fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(2));
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(LcpError::InflateFailed)?;
    Ok(out)
}

fn write_mimetype<W: Write + Seek>(writer: &mut ZipWriter<W>) -> Result<()> {
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    writer
        .start_file(MIMETYPE_PATH, options)
        .map_err(|e| LcpError::archive("creating mimetype entry", e))?;
    writer
        .write_all(EPUB_MIMETYPE.as_bytes())
        .map_err(|e| LcpError::io("writing mimetype entry", e))
}

fn entry_options(file: &ZipFile<'_>) -> FileOptions {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(file.last_modified());

    match file.unix_mode() {
        Some(mode) => options.unix_permissions(mode),
        None => options,
    }
}
