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


//! Encryption manifest (`META-INF/encryption.xml`) parsing
//!
//! # Document Shape
//! ```xml
//! <encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container"
//!             xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
//!   <enc:EncryptedData>
//!     <enc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-cbc"/>
//!     <enc:CipherData>
//!       <enc:CipherReference URI="OEBPS/chapter%201.xhtml"/>
//!     </enc:CipherData>
//!     <enc:EncryptionProperties>
//!       <enc:EncryptionProperty xmlns:ns="http://www.idpf.org/2016/encryption#compression">
//!         <ns:Compression Method="8" OriginalLength="4120"/>
//!       </enc:EncryptionProperty>
//!     </enc:EncryptionProperties>
//!   </enc:EncryptedData>
//! </encryption>
//! ```
//!
//! Elements are matched by local name, so any namespace prefix works.
//! Compression method 8 is DEFLATE; the resource was compressed before it was
//! encrypted and has to be inflated after decryption.

use std::collections::HashMap;
use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::trace;

use crate::crypto::algorithm::EncryptionAlgorithm;
use crate::error::{LcpError, Result};

/// Path of the encryption manifest inside an EPUB container
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

/// ZIP/DEFLATE compression method code
pub const DEFLATE_METHOD: i64 = 8;

/// One protected resource declared by the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Archive entry name (percent-decoded cipher reference)
    pub path: String,
    pub algorithm: EncryptionAlgorithm,
    /// Whether the plaintext must be inflated after decryption
    pub is_compressed: bool,
}

/// Path-keyed lookup of protected resources
///
/// When the manifest lists a path more than once the last declaration wins.
#[derive(Debug, Clone, Default)]
pub struct EncryptionPolicies {
    entries: HashMap<String, FileEntry>,
}

impl EncryptionPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the lookup from the manifest's ordered list
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        entries.into_iter().collect()
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<FileEntry> for EncryptionPolicies {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        let mut entries = HashMap::new();
        for entry in iter {
            entries.insert(entry.path.clone(), entry);
        }
        Self { entries }
    }
}

/// Fields collected while inside one `EncryptedData` element
#[derive(Debug, Default)]
struct PendingEntry {
    algorithm: String,
    uri: String,
    is_compressed: bool,
}

impl PendingEntry {
    fn finish(self) -> Result<FileEntry> {
        let path = decode_path(&self.uri)?;

        let algorithm = EncryptionAlgorithm::from_uri(&self.algorithm).ok_or_else(|| {
            LcpError::UnsupportedAlgorithm {
                path: path.clone(),
                algorithm: self.algorithm.clone(),
            }
        })?;

        Ok(FileEntry {
            path,
            algorithm,
            is_compressed: self.is_compressed,
        })
    }
}

/// Parse encryption.xml into the list of protected resources, in document order
///
/// # Errors
/// - InvalidManifest if the XML is malformed or a compression method is not a number
/// - InvalidEntryPath if a cipher reference is not valid percent-encoding
/// - UnsupportedAlgorithm for any algorithm other than AES-256-CBC and font
///   obfuscation. The whole parse fails, even if other entries are fine.
pub fn parse_encryption_xml<R: BufRead>(source: R) -> Result<Vec<FileEntry>> {
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();

    // Local names of the currently open elements, root first
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut seen_root = false;
    let mut pending: Option<PendingEntry> = None;
    let mut entries = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) => {
                let name = element.local_name().as_ref().to_vec();
                handle_element(&element, &stack, &mut pending)?;
                if stack.len() == 1 && name == b"EncryptedData" {
                    pending = Some(PendingEntry::default());
                }
                stack.push(name);
                seen_root = true;
            }
            Event::Empty(element) => {
                if stack.len() == 1 && element.local_name().as_ref() == b"EncryptedData" {
                    entries.push(PendingEntry::default().finish()?);
                } else {
                    handle_element(&element, &stack, &mut pending)?;
                }
                seen_root = true;
            }
            Event::End(_) => {
                let closed = stack.pop();
                if stack.len() == 1 && closed.as_deref() == Some(b"EncryptedData".as_slice()) {
                    if let Some(entry) = pending.take() {
                        let entry = entry.finish()?;
                        trace!(path = %entry.path, algorithm = %entry.algorithm, compressed = entry.is_compressed, "manifest entry");
                        entries.push(entry);
                    }
                }
                if stack.is_empty() {
                    break;
                }
            }
            Event::Eof => {
                if !seen_root {
                    return Err(LcpError::InvalidManifest("document is empty".to_string()));
                }
                if !stack.is_empty() {
                    return Err(LcpError::InvalidManifest(
                        "unexpected end of document".to_string(),
                    ));
                }
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Record attributes of an element nested in the current `EncryptedData`
fn handle_element(
    element: &BytesStart<'_>,
    stack: &[Vec<u8>],
    pending: &mut Option<PendingEntry>,
) -> Result<()> {
    let Some(entry) = pending.as_mut() else {
        return Ok(());
    };

    // stack[0] is the root, stack[1] the EncryptedData element
    let parents: Vec<&[u8]> = stack.iter().skip(2).map(Vec::as_slice).collect();

    match (element.local_name().as_ref(), parents.as_slice()) {
        (b"EncryptionMethod", []) => {
            if let Some(value) = attribute(element, b"Algorithm")? {
                entry.algorithm = value;
            }
        }
        (b"CipherReference", [b"CipherData"]) => {
            if let Some(value) = attribute(element, b"URI")? {
                entry.uri = value;
            }
        }
        (b"Compression", [b"EncryptionProperties", b"EncryptionProperty"]) => {
            if let Some(value) = attribute(element, b"Method")? {
                if parse_method(&value)? == DEFLATE_METHOD {
                    entry.is_compressed = true;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local_name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_method(value: &str) -> Result<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    value.parse::<i64>().map_err(|e| {
        LcpError::InvalidManifest(format!("invalid compression method '{}': {}", value, e))
    })
}

/// Percent-decode a cipher reference into an archive entry name
///
/// Every `%` must be followed by two hex digits and the result must be UTF-8.
/// `+` is left alone, as in any URI path.
pub fn decode_path(uri: &str) -> Result<String> {
    let bytes = uri.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() >= i + 3
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(LcpError::InvalidEntryPath {
                    uri: uri.to_string(),
                    reason: format!("invalid escape at byte {}", i),
                });
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(uri)
        .map(|path| path.into_owned())
        .map_err(|e| LcpError::InvalidEntryPath {
            uri: uri.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::algorithm::{AES256_CBC_URI, FONT_OBFUSCATION_URI};
    use crate::error::ErrorKind;

    fn record(algorithm: &str, uri: &str, compression: Option<&str>) -> String {
        let properties = compression
            .map(|method| {
                format!(
                    r#"<enc:EncryptionProperties>
                         <enc:EncryptionProperty xmlns:ns="http://www.idpf.org/2016/encryption#compression">
                           <ns:Compression Method="{}" OriginalLength="100"/>
                         </enc:EncryptionProperty>
                       </enc:EncryptionProperties>"#,
                    method
                )
            })
            .unwrap_or_default();
        format!(
            r#"<enc:EncryptedData>
                 <enc:EncryptionMethod Algorithm="{}"/>
                 <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                   <ds:RetrievalMethod URI="license.lcpl#/encryption/content_key"/>
                 </ds:KeyInfo>
                 <enc:CipherData><enc:CipherReference URI="{}"/></enc:CipherData>
                 {}
               </enc:EncryptedData>"#,
            algorithm, uri, properties
        )
    }

    fn manifest(records: &[String]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container"
            xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
{}
</encryption>"#,
            records.join("\n")
        )
    }

    #[test]
    fn test_parses_entries_in_order() {
        let xml = manifest(&[
            record(AES256_CBC_URI, "OEBPS/ch1.xhtml", Some("8")),
            record(AES256_CBC_URI, "OEBPS/images/cover.jpg", Some("0")),
            record(FONT_OBFUSCATION_URI, "OEBPS/fonts/serif.otf", None),
        ]);

        let entries = parse_encryption_xml(xml.as_bytes()).unwrap();
        assert_eq!(
            entries,
            vec![
                FileEntry {
                    path: "OEBPS/ch1.xhtml".into(),
                    algorithm: EncryptionAlgorithm::Aes256Cbc,
                    is_compressed: true,
                },
                FileEntry {
                    path: "OEBPS/images/cover.jpg".into(),
                    algorithm: EncryptionAlgorithm::Aes256Cbc,
                    is_compressed: false,
                },
                FileEntry {
                    path: "OEBPS/fonts/serif.otf".into(),
                    algorithm: EncryptionAlgorithm::FontObfuscation,
                    is_compressed: false,
                },
            ]
        );
    }

    #[test]
    fn test_unprefixed_elements() {
        let xml = format!(
            r#"<encryption><EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
                 <EncryptionMethod Algorithm="{}"/>
                 <CipherData><CipherReference URI="a.xhtml"/></CipherData>
               </EncryptedData></encryption>"#,
            AES256_CBC_URI
        );
        let entries = parse_encryption_xml(xml.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a.xhtml");
    }

    #[test]
    fn test_percent_decoded_path() {
        let xml = manifest(&[record(AES256_CBC_URI, "OEBPS/chapter%201%2B2.xhtml", None)]);
        let entries = parse_encryption_xml(xml.as_bytes()).unwrap();
        assert_eq!(entries[0].path, "OEBPS/chapter 1+2.xhtml");
    }

    #[test]
    fn test_invalid_escape_fails() {
        let xml = manifest(&[record(AES256_CBC_URI, "OEBPS/bad%zz.xhtml", None)]);
        let err = parse_encryption_xml(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, LcpError::InvalidEntryPath { .. }));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_truncated_escape_fails() {
        assert!(decode_path("abc%4").is_err());
        assert!(decode_path("abc%").is_err());
        assert_eq!(decode_path("plain/path.xhtml").unwrap(), "plain/path.xhtml");
    }

    #[test]
    fn test_unsupported_algorithm_aborts_whole_manifest() {
        let xml = manifest(&[
            record(AES256_CBC_URI, "OEBPS/ch1.xhtml", None),
            record("http://www.w3.org/2001/04/xmlenc#aes128-cbc", "OEBPS/ch2.xhtml", None),
        ]);
        let err = parse_encryption_xml(xml.as_bytes()).unwrap_err();
        match err {
            LcpError::UnsupportedAlgorithm { path, algorithm } => {
                assert_eq!(path, "OEBPS/ch2.xhtml");
                assert_eq!(algorithm, "http://www.w3.org/2001/04/xmlenc#aes128-cbc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_algorithm_is_unsupported() {
        let xml = r#"<encryption><EncryptedData><CipherData><CipherReference URI="x"/></CipherData></EncryptedData></encryption>"#;
        let err = parse_encryption_xml(xml.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn test_non_numeric_compression_method() {
        let xml = manifest(&[record(AES256_CBC_URI, "a.xhtml", Some("deflate"))]);
        let err = parse_encryption_xml(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, LcpError::InvalidManifest(_)));
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_encryption_xml(&b"<encryption><EncryptedData></encryption>"[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = parse_encryption_xml(&b""[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_empty_manifest() {
        let entries = parse_encryption_xml(manifest(&[]).as_bytes()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_duplicate_path_last_wins() {
        let entries = vec![
            FileEntry {
                path: "a".into(),
                algorithm: EncryptionAlgorithm::Aes256Cbc,
                is_compressed: true,
            },
            FileEntry {
                path: "a".into(),
                algorithm: EncryptionAlgorithm::FontObfuscation,
                is_compressed: false,
            },
        ];
        let policies = EncryptionPolicies::from_entries(entries);

        assert_eq!(policies.len(), 1);
        let entry = policies.get("a").unwrap();
        assert_eq!(entry.algorithm, EncryptionAlgorithm::FontObfuscation);
        assert!(!entry.is_compressed);
        assert!(!policies.contains("b"));
    }
}
