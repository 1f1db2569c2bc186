//! Multi-version in-memory table.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// One committed version of a key. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Version {
    seq: u64,
    value: Option<Vec<u8>>,
}

/// Ordered map from key to its committed versions, oldest first.
#[derive(Debug, Default)]
pub(crate) struct MemTable {
    entries: BTreeMap<Vec<u8>, Vec<Version>>,
    /// Keys holding more than one version or a tombstone; the only keys
    /// pruning has to look at.
    stale: BTreeSet<Vec<u8>>,
}

impl MemTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a committed write. `seq` must not go backwards per key.
    pub(crate) fn apply(&mut self, key: Vec<u8>, seq: u64, value: Option<Vec<u8>>) {
        let tombstone = value.is_none();
        let versions = self.entries.entry(key.clone()).or_default();
        versions.push(Version { seq, value });
        if tombstone || versions.len() > 1 {
            self.stale.insert(key);
        }
    }

    fn visible(versions: &[Version], snapshot: u64) -> Option<&Version> {
        versions.iter().rev().find(|v| v.seq <= snapshot)
    }

    /// Value of `key` as of `snapshot`.
    pub(crate) fn get(&self, key: &[u8], snapshot: u64) -> Option<&[u8]> {
        let versions = self.entries.get(key)?;
        Self::visible(versions, snapshot)?.value.as_deref()
    }

    /// Sequence of the newest committed version of `key`, tombstones
    /// included.
    pub(crate) fn latest_seq(&self, key: &[u8]) -> Option<u64> {
        self.entries.get(key)?.last().map(|v| v.seq)
    }

    /// Live `(key, value)` pairs under `prefix` as of `snapshot`, in key
    /// order.
    pub(crate) fn scan_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
        snapshot: u64,
    ) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.entries
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .filter_map(move |(k, versions)| {
                let value = Self::visible(versions, snapshot)?.value.as_deref()?;
                Some((k.as_slice(), value))
            })
    }

    /// Drops versions no snapshot at or after `horizon` can see.
    ///
    /// For each key the newest version at or below `horizon` is kept along
    /// with everything newer; a key whose only remaining version is a
    /// tombstone at or below `horizon` disappears.
    pub(crate) fn prune(&mut self, horizon: u64) -> usize {
        let mut dropped = 0;
        let entries = &mut self.entries;
        self.stale.retain(|key| {
            let Some(versions) = entries.get_mut(key) else {
                return false;
            };
            if let Some(keep_from) = versions.iter().rposition(|v| v.seq <= horizon) {
                dropped += keep_from;
                versions.drain(..keep_from);
            }
            let head = &versions[0];
            if versions.len() == 1 && head.seq <= horizon && head.value.is_none() {
                entries.remove(key);
                dropped += 1;
                return false;
            }
            versions.len() > 1 || versions[0].value.is_none()
        });
        dropped
    }

    /// Number of keys with at least one version.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Keys still carrying history.
    pub(crate) fn stale_len(&self) -> usize {
        self.stale.len()
    }
}
