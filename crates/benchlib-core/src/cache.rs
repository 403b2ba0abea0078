//! Per-driver settings cache.
//!
//! Holds the last configuration a driver successfully wrote to (or read
//! from) the instrument, keyed by channel index and setting name. The
//! instrument stays authoritative: getters always go to the wire, and the
//! cache is only written after a round trip succeeds. It exists for
//! diagnostics and for callers that want the last-known value without I/O.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Channel index used for instrument-wide settings.
pub const INSTRUMENT_WIDE: usize = usize::MAX;

/// A cached setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl From<f64> for CachedValue {
    fn from(v: f64) -> Self {
        CachedValue::Float(v)
    }
}

impl From<i64> for CachedValue {
    fn from(v: i64) -> Self {
        CachedValue::Int(v)
    }
}

impl From<u32> for CachedValue {
    fn from(v: u32) -> Self {
        CachedValue::Int(i64::from(v))
    }
}

impl From<bool> for CachedValue {
    fn from(v: bool) -> Self {
        CachedValue::Bool(v)
    }
}

impl From<String> for CachedValue {
    fn from(v: String) -> Self {
        CachedValue::Text(v)
    }
}

impl From<&str> for CachedValue {
    fn from(v: &str) -> Self {
        CachedValue::Text(v.to_string())
    }
}

type Key = (usize, &'static str);

/// Last-known settings keyed by `(channel, setting)`.
#[derive(Debug, Default)]
pub struct SettingsCache {
    entries: Mutex<HashMap<Key, CachedValue>>,
}

impl SettingsCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, CachedValue>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned lock is still usable.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a value.
    pub fn store(&self, channel: usize, setting: &'static str, value: impl Into<CachedValue>) {
        self.lock().insert((channel, setting), value.into());
    }

    /// Look up a value.
    pub fn get(&self, channel: usize, setting: &'static str) -> Option<CachedValue> {
        self.lock().get(&(channel, setting)).cloned()
    }

    /// Look up a floating point value.
    pub fn get_f64(&self, channel: usize, setting: &'static str) -> Option<f64> {
        match self.get(channel, setting)? {
            CachedValue::Float(v) => Some(v),
            CachedValue::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    /// Look up a boolean value.
    pub fn get_bool(&self, channel: usize, setting: &'static str) -> Option<bool> {
        match self.get(channel, setting)? {
            CachedValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Forget one value.
    pub fn invalidate(&self, channel: usize, setting: &'static str) {
        self.lock().remove(&(channel, setting));
    }

    /// Forget everything (after `*RST`).
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A copy of every cached value.
    pub fn snapshot(&self) -> HashMap<(usize, &'static str), CachedValue> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_get() {
        let cache = SettingsCache::new();
        cache.store(0, "frequency", 1000.0);
        cache.store(0, "output", true);
        cache.store(1, "frequency", 2000.0);

        assert_eq!(cache.get_f64(0, "frequency"), Some(1000.0));
        assert_eq!(cache.get_f64(1, "frequency"), Some(2000.0));
        assert_eq!(cache.get_bool(0, "output"), Some(true));
        assert_eq!(cache.get(2, "frequency"), None);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn overwrite_and_invalidate() {
        let cache = SettingsCache::new();
        cache.store(0, "waveform", "Sine");
        cache.store(0, "waveform", "Square");
        assert_eq!(
            cache.get(0, "waveform"),
            Some(CachedValue::Text("Square".into()))
        );
        cache.invalidate(0, "waveform");
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = SettingsCache::new();
        cache.store(INSTRUMENT_WIDE, "trigger_rate", 10.0);
        cache.store(0, "burst_count", 5u32);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn int_reads_as_f64() {
        let cache = SettingsCache::new();
        cache.store(0, "burst_count", 5i64);
        assert_eq!(cache.get_f64(0, "burst_count"), Some(5.0));
        assert_eq!(cache.get_bool(0, "burst_count"), None);
    }
}
