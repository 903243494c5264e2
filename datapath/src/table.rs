// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The exact-match flow table.
//!
//! A fixed array of buckets indexed by a seeded hash of the key. The bucket
//! count never changes, which is what makes the (bucket, offset) dump cursor
//! meaningful across calls: a dump that yields between pages never needs the
//! table to hold still, at the documented price that entries mutated
//! mid-dump may be seen once, twice, or not at all.

use std::hash::BuildHasher;
use std::sync::Arc;

use ahash::RandomState;

use crate::actions::ActionList;
use crate::key::FlowKey;
use crate::{DpError, MAX_FLOWS};

pub(crate) const N_BUCKETS: usize = 1024;

/// Per-flow statistics maintained on every hit.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowStats {
    /// Packets matched.
    pub n_packets: u64,
    /// Bytes matched.
    pub n_bytes: u64,
    /// Last hit, in monotonic milliseconds; zero if never hit.
    pub used_ms: u64,
    /// OR of the TCP flag bytes of matched packets.
    pub tcp_flags: u8,
}

#[derive(Debug)]
pub(crate) struct FlowEntry {
    pub(crate) key: FlowKey,
    pub(crate) actions: Arc<ActionList>,
    pub(crate) stats: FlowStats,
}

#[derive(Debug)]
pub(crate) struct FlowTable {
    hash: RandomState,
    buckets: Vec<Vec<FlowEntry>>,
    len: usize,
}

impl FlowTable {
    pub(crate) fn new() -> Self {
        FlowTable {
            // Seeded so bucket indices are stable for the process lifetime.
            hash: RandomState::with_seed(0),
            buckets: (0..N_BUCKETS).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    fn bucket_of(&self, key: &FlowKey) -> usize {
        (self.hash.hash_one(key) as usize) & (N_BUCKETS - 1)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, key: &FlowKey) -> Option<&FlowEntry> {
        self.buckets[self.bucket_of(key)]
            .iter()
            .find(|e| e.key == *key)
    }

    pub(crate) fn get_mut(&mut self, key: &FlowKey) -> Option<&mut FlowEntry> {
        let b = self.bucket_of(key);
        self.buckets[b].iter_mut().find(|e| e.key == *key)
    }

    /// Insert a new entry with zeroed statistics.
    pub(crate) fn insert(
        &mut self,
        key: FlowKey,
        actions: Arc<ActionList>,
    ) -> Result<(), DpError> {
        if self.get(&key).is_some() {
            return Err(DpError::Exists);
        }
        if self.len >= MAX_FLOWS {
            return Err(DpError::TooBig);
        }
        let b = self.bucket_of(&key);
        self.buckets[b].push(FlowEntry {
            key,
            actions,
            stats: FlowStats::default(),
        });
        self.len += 1;
        Ok(())
    }

    pub(crate) fn remove(&mut self, key: &FlowKey) -> Option<FlowEntry> {
        let b = self.bucket_of(key);
        let pos = self.buckets[b].iter().position(|e| e.key == *key)?;
        self.len -= 1;
        Some(self.buckets[b].swap_remove(pos))
    }

    pub(crate) fn clear(&mut self) {
        for b in &mut self.buckets {
            b.clear();
        }
        self.len = 0;
    }

    /// Entry at `cursor`, and the cursor of its successor.
    pub(crate) fn at(&self, cursor: (u32, u32)) -> Option<(&FlowEntry, (u32, u32))> {
        let (mut b, mut off) = cursor;
        while (b as usize) < N_BUCKETS {
            let bucket = &self.buckets[b as usize];
            if (off as usize) < bucket.len() {
                return Some((&bucket[off as usize], (b, off + 1)));
            }
            b += 1;
            off = 0;
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::{L3Key, L4Key, Mac};
    use crate::port::PortNo;
    use std::collections::HashSet;

    fn key(n: u32) -> FlowKey {
        FlowKey {
            in_port: PortNo(1),
            eth_src: Mac([2, 0, 0, 0, 0, 1]),
            eth_dst: Mac([2, 0, 0, 0, 0, 2]),
            vlan_tci: None,
            eth_type: crate::key::ETH_TYPE_IP,
            l3: L3Key::Ipv4(crate::key::Ipv4Key {
                src: n.to_be_bytes().into(),
                dst: "10.0.0.1".parse().unwrap(),
                proto: 17,
                tos: 0,
                ttl: 64,
                frag: crate::key::FragKind::None,
            }),
            l4: L4Key::None,
        }
    }

    fn empty_actions() -> Arc<ActionList> {
        Arc::new(ActionList::from_bytes(&[]).unwrap())
    }

    #[test]
    fn insert_get_remove() {
        let mut t = FlowTable::new();
        t.insert(key(1), empty_actions()).unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.get(&key(1)).is_some());
        assert!(t.get(&key(2)).is_none());

        assert!(matches!(
            t.insert(key(1), empty_actions()),
            Err(DpError::Exists)
        ));

        let removed = t.remove(&key(1)).unwrap();
        assert_eq!(removed.stats, FlowStats::default());
        assert_eq!(t.len(), 0);
        assert!(t.remove(&key(1)).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut t = FlowTable::new();
        for n in 0..MAX_FLOWS as u32 {
            t.insert(key(n), empty_actions()).unwrap();
        }
        assert_eq!(t.len(), MAX_FLOWS);
        assert!(matches!(
            t.insert(key(MAX_FLOWS as u32), empty_actions()),
            Err(DpError::TooBig)
        ));
    }

    #[test]
    fn cursor_walks_every_entry_exactly_once() {
        let mut t = FlowTable::new();
        for n in 0..500 {
            t.insert(key(n), empty_actions()).unwrap();
        }

        let mut seen = HashSet::new();
        let mut cursor = (0, 0);
        while let Some((entry, next)) = t.at(cursor) {
            assert!(seen.insert(entry.key));
            cursor = next;
        }
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn cursor_survives_mutation_between_pages() {
        let mut t = FlowTable::new();
        for n in 0..100 {
            t.insert(key(n), empty_actions()).unwrap();
        }
        let (_, cursor) = t.at((0, 0)).unwrap();

        // Delete and insert behind the dump's back; the walk must not
        // crash or loop, though entries may be missed or repeated.
        for n in 0..50 {
            t.remove(&key(n));
        }
        for n in 200..260 {
            t.insert(key(n), empty_actions()).unwrap();
        }

        let mut cursor = cursor;
        let mut steps = 0;
        while let Some((_, next)) = t.at(cursor) {
            cursor = next;
            steps += 1;
            assert!(steps <= t.len() + 1);
        }
    }

    #[test]
    fn clear_empties_the_table() {
        let mut t = FlowTable::new();
        for n in 0..10 {
            t.insert(key(n), empty_actions()).unwrap();
        }
        t.clear();
        assert_eq!(t.len(), 0);
        assert!(t.at((0, 0)).is_none());
    }
}
