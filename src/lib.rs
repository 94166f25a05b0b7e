//! LCP Core
//!
//! Removes Readium LCP protection from EPUB books, given the user key (the
//! hashed passphrase) that the license was issued for.
//!
//! # Modules
//! - [`crypto`]: AES-256-CBC primitive, encryption algorithm registry, user key
//! - [`lcp`]: license document and encryption manifest
//! - [`epub`]: archive transcoder and the [`EpubDecrypter`] facade
//! - [`bridge`]: handle-based buffer API for WebAssembly and C hosts
//! - [`error`]: error type shared by all of the above

pub mod bridge;
pub mod crypto;
pub mod epub;
pub mod error;
pub mod lcp;

pub use crypto::user_key::UserKey;
pub use epub::{decrypt_bytes, inspect, BookInfo, EpubDecrypter, EntryAction, EntryProgress};
pub use error::{ErrorKind, LcpError, Result};
pub use lcp::{ContentKey, License};
