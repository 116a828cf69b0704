//! Version log
//!
//! Before-images of committed writes, kept only as long as some active
//! transaction's snapshot predates them.

use bytes::Bytes;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
struct LogEntry {
    version: u64,
    /// Value before this version was applied (`None` = key was absent)
    before: Option<Bytes>,
}

/// Per-key before-images in ascending version order
#[derive(Debug, Default)]
pub(crate) struct VersionLog {
    by_key: FxHashMap<Bytes, Vec<LogEntry>>,
    entries: usize,
}

impl VersionLog {
    pub fn record(&mut self, version: u64, key: Bytes, before: Option<Bytes>) {
        self.by_key
            .entry(key)
            .or_default()
            .push(LogEntry { version, before });
        self.entries += 1;
    }

    /// Drop the entry for `version` (used when the write it guarded failed)
    pub fn unrecord(&mut self, version: u64, key: &[u8]) {
        if let Some(entries) = self.by_key.get_mut(key) {
            if entries.last().is_some_and(|e| e.version == version) {
                entries.pop();
                self.entries -= 1;
            }
            if entries.is_empty() {
                self.by_key.remove(key);
            }
        }
    }

    /// Value `key` had at `snapshot`, if anything changed it since
    pub fn before_image(&self, key: &[u8], snapshot: u64) -> Option<Option<Bytes>> {
        self.by_key
            .get(key)?
            .iter()
            .find(|e| e.version > snapshot)
            .map(|e| e.before.clone())
    }

    /// Newest version that modified `key` after `snapshot`
    pub fn modified_after(&self, key: &[u8], snapshot: u64) -> Option<u64> {
        self.by_key
            .get(key)?
            .last()
            .filter(|e| e.version > snapshot)
            .map(|e| e.version)
    }

    /// Keep only entries newer than `oldest_snapshot` (`None` clears the log)
    pub fn prune(&mut self, oldest_snapshot: Option<u64>) {
        let Some(oldest) = oldest_snapshot else {
            self.by_key.clear();
            self.entries = 0;
            return;
        };

        let mut kept = 0;
        self.by_key.retain(|_, entries| {
            entries.retain(|e| e.version > oldest);
            kept += entries.len();
            !entries.is_empty()
        });
        self.entries = kept;
    }

    pub fn len(&self) -> usize {
        self.entries
    }
}
