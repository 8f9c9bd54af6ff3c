//! Lazy-default settings store.
//!
//! A flat mapping from string key to a typed value (number, boolean, or
//! list of numbers), loaded once at startup and rewritten to stable
//! storage on every mutation. Reading an absent key with a supplied
//! default writes that default back immediately — after the first read
//! the key exists, so every consumer of a key sees the same value and
//! the web façade can enumerate live configuration.
//!
//! Persistence goes through the [`SettingsBackend`] port
//! (memory/file/NVS, see `adapters::storage`); the store itself only
//! deals in one JSON blob. Readers always see the in-memory map, which
//! is updated atomically relative to cooperative tasks — there is no
//! suspension point inside any accessor.

use core::cell::RefCell;
use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::SettingsBackend;
use crate::error::SettingsError;

/// Capacity of a stored number list (e.g. watering hours).
pub const MAX_LIST_LEN: usize = 8;

/// Fixed-capacity list of numbers, as stored in settings.
pub type NumberList = heapless::Vec<f64, MAX_LIST_LEN>;

/// One stored setting. Untagged so the JSON blob stays the plain
/// `{"key": value}` shape the original controller persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Numbers(NumberList),
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<NumberList> for SettingValue {
    fn from(v: NumberList) -> Self {
        Self::Numbers(v)
    }
}

type Map = BTreeMap<String, SettingValue>;

/// The settings store. Shared between components as `Rc<Settings>`;
/// interior mutability keeps the accessors `&self` so a read can
/// perform its first-read write-back.
pub struct Settings {
    map: RefCell<Map>,
    backend: RefCell<Box<dyn SettingsBackend>>,
}

impl Settings {
    /// Load the store from `backend`. A missing, unreadable or corrupt
    /// blob is treated as "no settings yet": the store starts empty and
    /// a `created` marker is written so the blob exists from then on.
    pub fn load(backend: Box<dyn SettingsBackend>) -> Self {
        let store = Self {
            map: RefCell::new(Map::new()),
            backend: RefCell::new(backend),
        };

        let loaded = store.backend.borrow_mut().load();
        match loaded {
            Ok(Some(json)) => match serde_json::from_str::<Map>(&json) {
                Ok(map) => {
                    info!("settings: loaded {} key(s)", map.len());
                    *store.map.borrow_mut() = map;
                }
                Err(_) => {
                    warn!("settings: stored blob is corrupt, starting fresh");
                    store.mark_created();
                }
            },
            Ok(None) => {
                info!("settings: no stored blob, starting fresh");
                store.mark_created();
            }
            Err(e) => {
                warn!("settings: load failed ({e}), starting fresh");
                store.mark_created();
            }
        }
        store
    }

    fn mark_created(&self) {
        if let Err(e) = self.set("created", true) {
            warn!("settings: could not persist fresh store: {e}");
        }
    }

    // ── Typed accessors ───────────────────────────────────────

    /// Numeric setting; writes `default` back on first read.
    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64, SettingsError> {
        match self.get_or_insert(key, SettingValue::Number(default))? {
            SettingValue::Number(n) => Ok(n),
            _ => Err(SettingsError::WrongType),
        }
    }

    /// Boolean setting; writes `default` back on first read.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, SettingsError> {
        match self.get_or_insert(key, SettingValue::Bool(default))? {
            SettingValue::Bool(b) => Ok(b),
            _ => Err(SettingsError::WrongType),
        }
    }

    /// Number-list setting; writes `default` back on first read.
    /// Defaults longer than [`MAX_LIST_LEN`] are rejected.
    pub fn get_numbers(&self, key: &str, default: &[f64]) -> Result<NumberList, SettingsError> {
        let default = NumberList::from_slice(default).map_err(|()| SettingsError::Corrupt)?;
        match self.get_or_insert(key, SettingValue::Numbers(default))? {
            SettingValue::Numbers(v) => Ok(v),
            _ => Err(SettingsError::WrongType),
        }
    }

    /// Store `value` under `key` and rewrite the blob synchronously.
    pub fn set(&self, key: &str, value: impl Into<SettingValue>) -> Result<(), SettingsError> {
        self.map.borrow_mut().insert(String::from(key), value.into());
        self.persist()
    }

    /// Read-only raw lookup (status reporting); no write-back.
    pub fn value(&self, key: &str) -> Option<SettingValue> {
        self.map.borrow().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.borrow().contains_key(key)
    }

    // ── Internals ─────────────────────────────────────────────

    fn get_or_insert(&self, key: &str, default: SettingValue) -> Result<SettingValue, SettingsError> {
        if let Some(v) = self.map.borrow().get(key) {
            return Ok(v.clone());
        }
        // First read of the key is also its first write.
        self.map
            .borrow_mut()
            .insert(String::from(key), default.clone());
        self.persist()?;
        Ok(default)
    }

    fn persist(&self) -> Result<(), SettingsError> {
        let json =
            serde_json::to_string(&*self.map.borrow()).map_err(|_| SettingsError::Corrupt)?;
        self.backend.borrow_mut().save(&json)
    }
}
