//! Settings backends.
//!
//! The settings store deals in one JSON blob; these adapters decide
//! where that blob lives. Writes are atomic — readers of the backing
//! store never observe a torn blob.
//!
//! - [`MemoryBackend`] — simulation/tests.
//! - [`FileBackend`] — a plain file (host, or a mounted FAT/SPIFFS
//!   partition on device).
//! - [`NvsBackend`] — the blob in an NVS namespace (espidf only).

use crate::app::ports::SettingsBackend;
use crate::error::SettingsError;

#[cfg(not(target_os = "espidf"))]
use core::cell::RefCell;
#[cfg(not(target_os = "espidf"))]
use std::rc::Rc;

// ───────────────────────────────────────────────────────────────
// Memory backend (simulation / tests)
// ───────────────────────────────────────────────────────────────

/// In-memory blob. The blob cell can be shared between backend
/// instances to simulate a reboot-and-reload in tests.
#[cfg(not(target_os = "espidf"))]
pub struct MemoryBackend {
    blob: Rc<RefCell<Option<String>>>,
}

#[cfg(not(target_os = "espidf"))]
impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            blob: Rc::new(RefCell::new(None)),
        }
    }

    /// A backend whose blob cell is shared with another instance.
    pub fn with_blob(blob: Rc<RefCell<Option<String>>>) -> Self {
        Self { blob }
    }

    /// A backend pre-seeded with a raw blob (corrupt-input tests).
    pub fn with_json(json: &str) -> Self {
        Self {
            blob: Rc::new(RefCell::new(Some(String::from(json)))),
        }
    }

    /// Handle to the blob cell, for a later [`Self::with_blob`].
    pub fn shared_blob(&self) -> Rc<RefCell<Option<String>>> {
        Rc::clone(&self.blob)
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SettingsBackend for MemoryBackend {
    fn load(&mut self) -> Result<Option<String>, SettingsError> {
        Ok(self.blob.borrow().clone())
    }

    fn save(&mut self, json: &str) -> Result<(), SettingsError> {
        *self.blob.borrow_mut() = Some(String::from(json));
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// File backend
// ───────────────────────────────────────────────────────────────

/// Blob in a plain file. Saves write a sibling temp file and rename it
/// into place so a power cut mid-write leaves the old blob intact.
pub struct FileBackend {
    path: std::path::PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsBackend for FileBackend {
    fn load(&mut self) -> Result<Option<String>, SettingsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(_) => Err(SettingsError::Io("settings file read failed")),
        }
    }

    fn save(&mut self, json: &str) -> Result<(), SettingsError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|_| SettingsError::Io("settings file write failed"))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|_| SettingsError::Io("settings file rename failed"))
    }
}

// ───────────────────────────────────────────────────────────────
// NVS backend (espidf)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use nvs::NvsBackend;

#[cfg(target_os = "espidf")]
mod nvs {
    use super::{SettingsBackend, SettingsError};
    use esp_idf_svc::sys::*;
    use log::{info, warn};

    const NAMESPACE: &str = "dripfeed";
    const BLOB_KEY: &str = "settings";
    const MAX_BLOB_SIZE: usize = 4000;

    /// Settings blob stored in an NVS namespace. NVS commits are atomic
    /// per `nvs_commit()`, which gives the no-torn-blob guarantee for
    /// free.
    pub struct NvsBackend;

    impl NvsBackend {
        /// Initialise NVS flash. On first boot or after a version
        /// mismatch the partition is erased and re-initialised.
        pub fn new() -> Result<Self, SettingsError> {
            // SAFETY: nvs_flash_init/erase run once from the main task
            // before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("nvs: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK
                    || unsafe { nvs_flash_init() } != ESP_OK
                {
                    return Err(SettingsError::Io("nvs flash init failed"));
                }
            } else if ret != ESP_OK {
                return Err(SettingsError::Io("nvs flash init failed"));
            }
            info!("nvs: initialised");
            Ok(Self)
        }

        /// Open the namespace, run `f` with the handle, then close.
        fn with_handle<F, T>(write: bool, f: F) -> Result<T, i32>
        where
            F: FnOnce(nvs_handle_t) -> Result<T, i32>,
        {
            let mut ns = [0u8; 16];
            let bytes = NAMESPACE.as_bytes();
            ns[..bytes.len()].copy_from_slice(bytes);

            let mode = if write {
                nvs_open_mode_t_NVS_READWRITE
            } else {
                nvs_open_mode_t_NVS_READONLY
            };
            let mut handle: nvs_handle_t = 0;
            let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            let result = f(handle);
            unsafe { nvs_close(handle) };
            result
        }
    }

    impl SettingsBackend for NvsBackend {
        fn load(&mut self) -> Result<Option<String>, SettingsError> {
            let mut key = [0u8; 16];
            key[..BLOB_KEY.len()].copy_from_slice(BLOB_KEY.as_bytes());

            let result = Self::with_handle(false, |handle| {
                let mut len: usize = 0;
                let ret = unsafe {
                    nvs_get_str(handle, key.as_ptr() as *const _, core::ptr::null_mut(), &mut len)
                };
                if ret == ESP_ERR_NVS_NOT_FOUND {
                    return Ok(None);
                }
                if ret != ESP_OK || len == 0 || len > MAX_BLOB_SIZE {
                    return Err(ret);
                }
                let mut buf = vec![0u8; len];
                let ret = unsafe {
                    nvs_get_str(handle, key.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut len)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                buf.truncate(len.saturating_sub(1)); // drop NUL
                Ok(String::from_utf8(buf).ok())
            });

            match result {
                Ok(blob) => Ok(blob),
                // A namespace that does not exist yet is "nothing stored".
                Err(ESP_ERR_NVS_NOT_FOUND) => Ok(None),
                Err(_) => Err(SettingsError::Io("nvs read failed")),
            }
        }

        fn save(&mut self, json: &str) -> Result<(), SettingsError> {
            if json.len() >= MAX_BLOB_SIZE {
                return Err(SettingsError::Io("settings blob too large for nvs"));
            }
            let mut key = [0u8; 16];
            key[..BLOB_KEY.len()].copy_from_slice(BLOB_KEY.as_bytes());

            let mut value = Vec::with_capacity(json.len() + 1);
            value.extend_from_slice(json.as_bytes());
            value.push(0);

            Self::with_handle(true, |handle| {
                let ret = unsafe {
                    nvs_set_str(handle, key.as_ptr() as *const _, value.as_ptr() as *const _)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
            .map_err(|_| SettingsError::Io("nvs write failed"))
        }
    }
}
