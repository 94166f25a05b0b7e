//! End-to-end decryption of synthetic LCP-protected EPUBs
//!
//! Each test builds a protected book in memory the way an LCP server packages
//! it (resources encrypted with the content key, content key wrapped with the
//! user key) and checks the decrypted archive.

use std::fs::File;
use std::io::{Cursor, Read, Write};

use aes::Aes256;
use base64::engine::general_purpose;
use base64::Engine as _;
use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use lcp_core::crypto::algorithm::{AES256_CBC_URI, FONT_OBFUSCATION_URI};
use lcp_core::{decrypt_bytes, inspect, EntryAction, EpubDecrypter, ErrorKind, LcpError, License, UserKey};

const USER_KEY: [u8; 32] = [0x11; 32];
const CONTENT_KEY: [u8; 32] = [0x22; 32];
const LICENSE_ID: &str = "book-42";

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let iv = [0x5A; 16];
    let ciphertext = Aes256CbcEnc::new_from_slices(key, &iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut blob = iv.to_vec();
    blob.extend_from_slice(&ciphertext);
    blob
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn license_json(id: &str, key_check_plain: &str) -> String {
    serde_json::json!({
        "id": id,
        "issued": "2024-03-01T10:00:00Z",
        "provider": "https://bookstore.example",
        "encryption": {
            "profile": "http://readium.org/lcp/basic-profile",
            "content_key": {
                "algorithm": AES256_CBC_URI,
                "encrypted_value": general_purpose::STANDARD.encode(encrypt(&CONTENT_KEY, &USER_KEY)),
            },
            "user_key": {
                "algorithm": "http://www.w3.org/2001/04/xmlenc#sha256",
                "text_hint": "The title of your favorite book",
                "key_check": general_purpose::STANDARD.encode(encrypt(key_check_plain.as_bytes(), &USER_KEY)),
            },
        },
    })
    .to_string()
}

/// Builds a protected EPUB archive in memory
struct EpubBuilder {
    comment: String,
    license: Option<String>,
    manifest: Option<Vec<String>>,
    entries: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    fn new() -> Self {
        Self {
            comment: String::new(),
            license: Some(license_json(LICENSE_ID, LICENSE_ID)),
            manifest: Some(Vec::new()),
            entries: vec![(
                "META-INF/container.xml".to_string(),
                b"<container><rootfiles/></container>".to_vec(),
            )],
        }
    }

    fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    fn license(mut self, license: Option<String>) -> Self {
        self.license = license;
        self
    }

    fn without_manifest(mut self) -> Self {
        self.manifest = None;
        self
    }

    fn plain(mut self, path: &str, data: &[u8]) -> Self {
        self.entries.push((path.to_string(), data.to_vec()));
        self
    }

    fn directory(mut self, path: &str) -> Self {
        self.entries.push((path.to_string(), Vec::new()));
        self
    }

    /// Add a resource encrypted with the content key, deflated first if `compressed`
    fn encrypted(self, path: &str, uri: &str, data: &[u8], compressed: bool) -> Self {
        let payload = if compressed { deflate(data) } else { data.to_vec() };
        let blob = encrypt(&payload, &CONTENT_KEY);
        self.protected(path, uri, AES256_CBC_URI, &blob, compressed)
    }

    /// Add a resource whose stored bytes and declared algorithm are given as-is
    fn protected(mut self, path: &str, uri: &str, algorithm: &str, stored: &[u8], compressed: bool) -> Self {
        let compression = if compressed {
            r#"<enc:EncryptionProperties><enc:EncryptionProperty xmlns:ns="http://www.idpf.org/2016/encryption#compression"><ns:Compression Method="8" OriginalLength="0"/></enc:EncryptionProperty></enc:EncryptionProperties>"#
                .to_string()
        } else {
            String::new()
        };
        let block = format!(
            r#"<enc:EncryptedData><enc:EncryptionMethod Algorithm="{}"/><ds:KeyInfo><ds:RetrievalMethod URI="license.lcpl#/encryption/content_key" Type="http://readium.org/2014/01/lcp#EncryptedContentKey"/></ds:KeyInfo><enc:CipherData><enc:CipherReference URI="{}"/></enc:CipherData>{}</enc:EncryptedData>"#,
            algorithm, uri, compression
        );
        if let Some(manifest) = self.manifest.as_mut() {
            manifest.push(block);
        }
        self.entries.push((path.to_string(), stored.to_vec()));
        self
    }

    fn build(self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.set_comment(self.comment.clone());

        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("mimetype", stored).unwrap();
        writer.write_all(b"application/epub+zip").unwrap();

        if let Some(manifest) = &self.manifest {
            let xml = format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container" xmlns:enc="http://www.w3.org/2001/04/xmlenc#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{}</encryption>"#,
                manifest.concat()
            );
            writer.start_file("META-INF/encryption.xml", FileOptions::default()).unwrap();
            writer.write_all(xml.as_bytes()).unwrap();
        }
        if let Some(license) = &self.license {
            writer.start_file("META-INF/license.lcpl", FileOptions::default()).unwrap();
            writer.write_all(license.as_bytes()).unwrap();
        }

        for (name, data) in &self.entries {
            if name.ends_with('/') {
                writer.add_directory(name.as_str(), FileOptions::default()).unwrap();
            } else {
                // Encrypted blobs do not compress; store them like LCP servers do
                writer.start_file(name.as_str(), stored).unwrap();
                writer.write_all(data).unwrap();
            }
        }

        writer.finish().unwrap().into_inner()
    }
}

fn decrypt(epub: &[u8]) -> lcp_core::Result<ZipArchive<Cursor<Vec<u8>>>> {
    let decrypter = EpubDecrypter::new(UserKey::new(USER_KEY));
    let output = decrypter.decrypt(Cursor::new(epub), Cursor::new(Vec::new()))?;
    Ok(ZipArchive::new(Cursor::new(output.into_inner())).unwrap())
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut out).unwrap();
    out
}

fn entry_names<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Vec<String> {
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

const CHAPTER: &[u8] = b"<html><body><p>It was a bright cold day in April.</p></body></html>";

#[test]
fn test_decrypts_compressed_and_uncompressed_resources() {
    let cover: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    let epub = EpubBuilder::new()
        .plain("OEBPS/content.opf", b"<package/>")
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, true)
        .encrypted("OEBPS/images/cover art.png", "OEBPS/images/cover%20art.png", &cover, false)
        .build();

    let mut out = decrypt(&epub).unwrap();

    assert_eq!(
        entry_names(&mut out),
        vec![
            "mimetype",
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/ch1.xhtml",
            "OEBPS/images/cover art.png",
        ]
    );
    assert_eq!(read_entry(&mut out, "OEBPS/ch1.xhtml"), CHAPTER);
    assert_eq!(read_entry(&mut out, "OEBPS/images/cover art.png"), cover);
}

#[test]
fn test_unlisted_entries_are_byte_identical() {
    let container = b"<container><rootfiles/></container>";
    let epub = EpubBuilder::new()
        .plain("OEBPS/style.css", b"p { margin: 0 }")
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .build();

    let mut out = decrypt(&epub).unwrap();

    assert_eq!(read_entry(&mut out, "META-INF/container.xml"), container);
    assert_eq!(read_entry(&mut out, "OEBPS/style.css"), b"p { margin: 0 }");
    assert!(out.by_name("META-INF/encryption.xml").is_err());
    assert!(out.by_name("META-INF/license.lcpl").is_err());
}

#[test]
fn test_mimetype_is_first_and_stored() {
    let epub = EpubBuilder::new()
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, true)
        .build();

    let mut out = decrypt(&epub).unwrap();
    let mimetype = out.by_index(0).unwrap();

    assert_eq!(mimetype.name(), "mimetype");
    assert_eq!(mimetype.compression(), CompressionMethod::Stored);
    drop(mimetype);
    assert_eq!(read_entry(&mut out, "mimetype"), b"application/epub+zip");
}

#[test]
fn test_directories_are_kept() {
    let epub = EpubBuilder::new()
        .directory("OEBPS/")
        .directory("OEBPS/images/")
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .build();

    let mut out = decrypt(&epub).unwrap();
    let dir = out.by_name("OEBPS/images/").unwrap();
    assert!(dir.is_dir());
    assert_eq!(dir.size(), 0);
}

#[test]
fn test_directory_listed_in_manifest_is_not_deciphered() {
    let epub = EpubBuilder::new()
        .protected("OEBPS/images/", "OEBPS/images/", AES256_CBC_URI, &[], false)
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .build();

    let mut out = decrypt(&epub).unwrap();

    assert_eq!(read_entry(&mut out, "OEBPS/ch1.xhtml"), CHAPTER);
    let dir = out.by_name("OEBPS/images/").unwrap();
    assert!(dir.is_dir());
    assert_eq!(dir.size(), 0);
}

#[test]
fn test_archive_comment_is_preserved() {
    let epub = EpubBuilder::new()
        .comment("packaged by bookstore.example")
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .build();

    let out = decrypt(&epub).unwrap();
    assert_eq!(out.comment(), b"packaged by bookstore.example");
}

#[test]
fn test_wrong_user_key_is_rejected() {
    let epub = EpubBuilder::new()
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .build();

    let decrypter = EpubDecrypter::new(UserKey::new([0x33; 32]));
    let err = decrypter
        .decrypt(Cursor::new(epub), Cursor::new(Vec::new()))
        .unwrap_err();

    assert!(err.is_crypto_error());
}

#[test]
fn test_key_check_mismatch() {
    let epub = EpubBuilder::new()
        .license(Some(license_json(LICENSE_ID, "another-book")))
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .build();

    let err = decrypt(&epub).unwrap_err();
    assert!(matches!(err, LcpError::KeyMismatch { ref license_id } if license_id == LICENSE_ID));
}

#[test]
fn test_unsupported_algorithm_fails_before_writing() {
    let epub = EpubBuilder::new()
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .protected(
            "OEBPS/ch2.xhtml",
            "OEBPS/ch2.xhtml",
            "http://www.w3.org/2001/04/xmlenc#kw-aes128",
            b"not even ciphertext",
            false,
        )
        .build();

    let mut destination = Cursor::new(Vec::new());
    let err = EpubDecrypter::new(UserKey::new(USER_KEY))
        .decrypt(Cursor::new(epub), &mut destination)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    assert!(matches!(err, LcpError::UnsupportedAlgorithm { ref path, .. } if path == "OEBPS/ch2.xhtml"));
    assert!(destination.get_ref().is_empty());
}

#[test]
fn test_font_obfuscation_passes_through() {
    let font = b"\x00\x01\x00\x00obfuscated font bytes";
    let epub = EpubBuilder::new()
        .protected("OEBPS/font.otf", "OEBPS/font.otf", FONT_OBFUSCATION_URI, font, false)
        .build();

    let mut out = decrypt(&epub).unwrap();
    assert_eq!(read_entry(&mut out, "OEBPS/font.otf"), font);
}

#[test]
fn test_corrupt_resource_names_the_entry() {
    let epub = EpubBuilder::new()
        .protected("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", AES256_CBC_URI, &[0u8; 21], false)
        .build();

    let err = decrypt(&epub).unwrap_err();
    assert_eq!(err.entry_name(), Some("OEBPS/ch1.xhtml"));
    assert_eq!(err.kind(), ErrorKind::Crypto);
}

#[test]
fn test_missing_documents() {
    let no_license = EpubBuilder::new().license(None).build();
    let err = decrypt(&no_license).unwrap_err();
    assert!(matches!(err, LcpError::MissingEntry(ref name) if name == "META-INF/license.lcpl"));

    let no_manifest = EpubBuilder::new().without_manifest().build();
    let err = decrypt(&no_manifest).unwrap_err();
    assert!(matches!(err, LcpError::MissingEntry(ref name) if name == "META-INF/encryption.xml"));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_external_license_overrides_embedded() {
    let epub = EpubBuilder::new()
        .license(Some(license_json(LICENSE_ID, "does-not-match")))
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, true)
        .build();
    let license: License = license_json(LICENSE_ID, LICENSE_ID).parse().unwrap();

    let output = EpubDecrypter::new(UserKey::new(USER_KEY))
        .with_license(license)
        .decrypt(Cursor::new(epub), Cursor::new(Vec::new()))
        .unwrap();

    let mut out = ZipArchive::new(output).unwrap();
    assert_eq!(read_entry(&mut out, "OEBPS/ch1.xhtml"), CHAPTER);
}

#[test]
fn test_progress_reports_every_written_entry() {
    let epub = EpubBuilder::new()
        .directory("OEBPS/")
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, false)
        .build();

    let mut events = Vec::new();
    EpubDecrypter::new(UserKey::new(USER_KEY))
        .decrypt_with_progress(Cursor::new(epub), Cursor::new(Vec::new()), |event| {
            assert_eq!(event.total, 6);
            events.push((event.name.to_string(), event.action));
        })
        .unwrap();

    assert_eq!(
        events,
        vec![
            ("META-INF/container.xml".to_string(), EntryAction::Copied),
            ("OEBPS/".to_string(), EntryAction::Directory),
            ("OEBPS/ch1.xhtml".to_string(), EntryAction::Decrypted),
        ]
    );
}

#[test]
fn test_inspect_lists_protected_resources() {
    let epub = EpubBuilder::new()
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, true)
        .encrypted("OEBPS/a b.png", "OEBPS/a%20b.png", b"png", false)
        .build();

    let info = inspect(Cursor::new(epub), None).unwrap();

    assert_eq!(info.license.id, LICENSE_ID);
    assert_eq!(info.license.provider.as_deref(), Some("https://bookstore.example"));
    let paths: Vec<(&str, bool)> = info
        .entries
        .iter()
        .map(|e| (e.path.as_str(), e.is_compressed))
        .collect();
    assert_eq!(paths, vec![("OEBPS/ch1.xhtml", true), ("OEBPS/a b.png", false)]);
}

#[test]
fn test_decrypt_bytes() {
    let epub = EpubBuilder::new()
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, true)
        .build();

    let output = decrypt_bytes(&epub, &hex::encode(USER_KEY)).unwrap();
    let mut out = ZipArchive::new(Cursor::new(output)).unwrap();
    assert_eq!(read_entry(&mut out, "OEBPS/ch1.xhtml"), CHAPTER);

    let err = decrypt_bytes(&epub, "zz").unwrap_err();
    assert!(matches!(err, LcpError::InvalidUserKey(_)));
}

#[test]
fn test_decrypt_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("book.epub");
    let output_path = dir.path().join("book.plain.epub");

    let epub = EpubBuilder::new()
        .plain("OEBPS/content.opf", b"<package/>")
        .encrypted("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml", CHAPTER, true)
        .build();
    std::fs::write(&input_path, epub).unwrap();

    let decrypter = EpubDecrypter::from_hex(&hex::encode(USER_KEY)).unwrap();
    let output = decrypter
        .decrypt(
            File::open(&input_path).unwrap(),
            File::create(&output_path).unwrap(),
        )
        .unwrap();
    output.sync_all().unwrap();
    drop(output);

    let mut out = ZipArchive::new(File::open(&output_path).unwrap()).unwrap();
    assert_eq!(read_entry(&mut out, "OEBPS/ch1.xhtml"), CHAPTER);
    assert_eq!(read_entry(&mut out, "OEBPS/content.opf"), b"<package/>");
}
