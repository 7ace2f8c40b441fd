//! Snapshot tables.
//!
//! A table holds the last decoded snapshot of one domain. Replacing it with a
//! fresh snapshot yields the set of changes between the two; the caller
//! dispatches those changes after the table lock has been released, so a
//! handler may read any table, including the one that produced the change.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<K, V> {
    Added(K, V),
    Removed(K, V),
    /// Key present in both with `(old, new)` values that differ.
    Modified(K, V, V),
}

impl<K, V> Change<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Change::Added(k, _) | Change::Removed(k, _) | Change::Modified(k, _, _) => k,
        }
    }
}

/// Ordered key/value snapshot with diff-on-replace.
#[derive(Debug)]
pub struct SnapshotTable<K, V> {
    entries: Mutex<BTreeMap<K, V>>,
}

impl<K, V> Default for SnapshotTable<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<K, V> SnapshotTable<K, V>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in `next` and returns the changes, in key order.
    pub fn replace(&self, next: BTreeMap<K, V>) -> Vec<Change<K, V>> {
        self.replace_with(next, |_, _, _| {})
    }

    /// Like [`replace`](Self::replace), but for keys present in both
    /// snapshots `keep(key, old, new)` may first carry state from the old
    /// value into the new one. The comparison sees the adjusted value.
    pub fn replace_with<F>(&self, mut next: BTreeMap<K, V>, mut keep: F) -> Vec<Change<K, V>>
    where
        F: FnMut(&K, &V, &mut V),
    {
        let mut entries = self.entries.lock();
        for (key, new) in next.iter_mut() {
            if let Some(old) = entries.get(key) {
                keep(key, old, new);
            }
        }
        let changes = diff(&entries, &next);
        *entries = next;
        changes
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<K, V> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Applies `f` to the value under `key`; false when the key is absent.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.entries.lock().get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }
}

/// Merge-walks two ordered maps.
fn diff<K, V>(old: &BTreeMap<K, V>, new: &BTreeMap<K, V>) -> Vec<Change<K, V>>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    let mut changes = Vec::new();
    let mut a = old.iter().peekable();
    let mut b = new.iter().peekable();
    loop {
        let order = match (a.peek(), b.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((ka, _)), Some((kb, _))) => ka.cmp(kb),
        };
        match order {
            Ordering::Less => {
                if let Some((k, v)) = a.next() {
                    changes.push(Change::Removed(k.clone(), v.clone()));
                }
            }
            Ordering::Greater => {
                if let Some((k, v)) = b.next() {
                    changes.push(Change::Added(k.clone(), v.clone()));
                }
            }
            Ordering::Equal => {
                if let (Some((k, va)), Some((_, vb))) = (a.next(), b.next()) {
                    if va != vb {
                        changes.push(Change::Modified(k.clone(), va.clone(), vb.clone()));
                    }
                }
            }
        }
    }
    changes
}
