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


//! Buffer bridge for embedding hosts (WebAssembly, C callers)
//!
//! Exposes decryption over a flat buffer space: the host allocates a buffer,
//! fills it through the returned pointer, calls `lcp_decrypt` and reads the
//! result back. Buffers are referred to by opaque handles.
//!
//! # Architecture
//! JavaScript/C host → C ABI (`lcp_*`) → [`BufferArena`] → [`crate::epub::decrypt_bytes`]
//!
//! The decryption engine never sees handles; it only receives and returns
//! byte slices. Handle bookkeeping lives entirely in this module.
//!
//! # Memory Management
//! **CRITICAL**: every handle returned by `lcp_new_bytes`, `lcp_decrypt` and
//! `lcp_last_error` MUST be released with `lcp_free_bytes`, on every path.
//!
//! Example host code (JavaScript):
//! ```js
//! const input = exports.lcp_new_bytes(epub.length);
//! new Uint8Array(memory.buffer, exports.lcp_bytes_ptr(input), epub.length).set(epub);
//! const key = exports.lcp_new_bytes(64);
//! new Uint8Array(memory.buffer, exports.lcp_bytes_ptr(key), 64).set(keyHexBytes);
//! const out = exports.lcp_decrypt(input, key);
//! exports.lcp_free_bytes(input);
//! exports.lcp_free_bytes(key);
//! ```

use std::collections::HashMap;

use thiserror::Error;

use crate::epub::decrypt_bytes;
use crate::error::LcpError;

/// Opaque buffer handle
pub type Handle = u32;

/// Handle that never refers to a buffer
pub const NULL_HANDLE: Handle = 0;

/// Errors raised by the bridge itself
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Handle was never allocated or has been freed
    #[error("Unknown buffer handle: {0}")]
    UnknownHandle(Handle),

    /// User key buffer is not UTF-8 text
    #[error("User key buffer is not valid UTF-8")]
    KeyNotUtf8,

    #[error(transparent)]
    Decrypt(#[from] LcpError),
}

/// Owned buffers addressed by handle
#[derive(Debug)]
pub struct BufferArena {
    buffers: HashMap<Handle, Vec<u8>>,
    next_handle: Handle,
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferArena {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Allocate a zero-filled buffer; zero-sized requests get [`NULL_HANDLE`]
    pub fn allocate(&mut self, size: usize) -> Handle {
        self.insert(vec![0u8; size])
    }

    /// Take ownership of `bytes`; empty buffers get [`NULL_HANDLE`]
    pub fn insert(&mut self, bytes: Vec<u8>) -> Handle {
        if bytes.is_empty() {
            return NULL_HANDLE;
        }

        let mut handle = self.next_handle;
        while handle == NULL_HANDLE || self.buffers.contains_key(&handle) {
            handle = handle.wrapping_add(1);
        }
        self.next_handle = handle.wrapping_add(1);

        self.buffers.insert(handle, bytes);
        handle
    }

    /// Release a buffer. Returns false if the handle was not live.
    pub fn free(&mut self, handle: Handle) -> bool {
        self.buffers.remove(&handle).is_some()
    }

    /// Size of a buffer, 0 for unknown handles
    pub fn size_of(&self, handle: Handle) -> usize {
        self.buffers.get(&handle).map_or(0, Vec::len)
    }

    pub fn get(&self, handle: Handle) -> Option<&[u8]> {
        self.buffers.get(&handle).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut [u8]> {
        self.buffers.get_mut(&handle).map(Vec::as_mut_slice)
    }

    /// Number of live buffers
    pub fn live(&self) -> usize {
        self.buffers.len()
    }

    /// Decrypt the EPUB in `input` with the hex user key in `user_key_hex`
    ///
    /// Input buffers stay owned by the caller; the result is a new handle.
    pub fn decrypt(&mut self, input: Handle, user_key_hex: Handle) -> Result<Handle, BridgeError> {
        let epub = self.get(input).ok_or(BridgeError::UnknownHandle(input))?;
        let key = self
            .get(user_key_hex)
            .ok_or(BridgeError::UnknownHandle(user_key_hex))?;
        let key = std::str::from_utf8(key).map_err(|_| BridgeError::KeyNotUtf8)?;

        let output = decrypt_bytes(epub, key)?;
        Ok(self.insert(output))
    }
}

/// C ABI over a process-wide arena
pub mod ffi {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::{Mutex, MutexGuard};

    use tracing::error;

    use super::{BufferArena, Handle, NULL_HANDLE};

    #[derive(Default)]
    struct BridgeState {
        arena: BufferArena,
        last_error: Option<String>,
    }

    lazy_static::lazy_static! {
        static ref STATE: Mutex<BridgeState> = Mutex::new(BridgeState::default());
    }

    fn state() -> MutexGuard<'static, BridgeState> {
        // A panic inside decrypt cannot leave the arena half-updated
        STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a zero-filled buffer of `size` bytes
    #[no_mangle]
    pub extern "C" fn lcp_new_bytes(size: usize) -> Handle {
        state().arena.allocate(size)
    }

    /// Free a buffer; unknown handles are ignored
    #[no_mangle]
    pub extern "C" fn lcp_free_bytes(handle: Handle) {
        state().arena.free(handle);
    }

    /// Size of a buffer in bytes, 0 for unknown handles
    #[no_mangle]
    pub extern "C" fn lcp_bytes_size(handle: Handle) -> usize {
        state().arena.size_of(handle)
    }

    /// Address of a buffer's first byte, null for unknown handles
    ///
    /// # Safety
    /// The pointer is valid for `lcp_bytes_size(handle)` bytes until the handle
    /// is freed. The host must not use it concurrently with other `lcp_*` calls.
    #[no_mangle]
    pub extern "C" fn lcp_bytes_ptr(handle: Handle) -> *mut u8 {
        state()
            .arena
            .get_mut(handle)
            .map_or(std::ptr::null_mut(), |buf| buf.as_mut_ptr())
    }

    /// Decrypt an EPUB buffer with a hex user key buffer
    ///
    /// Returns the handle of the decrypted EPUB, or [`NULL_HANDLE`] on failure;
    /// the reason is then available through `lcp_last_error`.
    #[no_mangle]
    pub extern "C" fn lcp_decrypt(input: Handle, user_key_hex: Handle) -> Handle {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            state().arena.decrypt(input, user_key_hex)
        }));

        let message = match result {
            Ok(Ok(handle)) => return handle,
            Ok(Err(e)) => e.to_string(),
            Err(panic_err) => {
                if let Some(s) = panic_err.downcast_ref::<String>() {
                    format!("Rust panic: {}", s)
                } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                    format!("Rust panic: {}", s)
                } else {
                    "Rust panic: unknown".to_string()
                }
            }
        };

        error!(error = %message, "bridge decrypt failed");
        state().last_error = Some(message);
        NULL_HANDLE
    }

    /// Copy the message of the most recent failure into a new buffer
    ///
    /// Returns [`NULL_HANDLE`] if nothing has failed yet.
    #[no_mangle]
    pub extern "C" fn lcp_last_error() -> Handle {
        let mut state = state();
        match state.last_error.clone() {
            Some(message) => state.arena.insert(message.into_bytes()),
            None => NULL_HANDLE,
        }
    }
}
