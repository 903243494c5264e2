// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bounded upcall rings.
//!
//! Each datapath carries one ring per upcall kind. Head and tail are free
//! running; the power-of-two capacity masks them onto slots, and fullness is
//! the plain difference, so the indices never need wrapping logic.

use crate::packet::PacketBuf;
use crate::MAX_QUEUE_LEN;

const QUEUE_MASK: u32 = MAX_QUEUE_LEN - 1;

/// Why a packet was handed up to the client.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpcallKind {
    /// No flow matched.
    Miss,
    /// A USERSPACE action asked for it.
    Action,
}

impl UpcallKind {
    pub(crate) fn queue_index(self) -> usize {
        match self {
            UpcallKind::Miss => 0,
            UpcallKind::Action => 1,
        }
    }
}

/// One packet handed up to the client, which assumes ownership.
#[derive(Debug)]
pub struct Upcall {
    pub kind: UpcallKind,
    /// The packet's key, serialized as an attribute stream.
    pub key: Vec<u8>,
    /// Userdata attached by the USERSPACE action, if any.
    pub userdata: Option<Vec<u8>>,
    /// The frame itself.
    pub packet: PacketBuf,
}

#[derive(Debug)]
pub(crate) struct UpcallQueue {
    slots: Vec<Option<Upcall>>,
    head: u32,
    tail: u32,
}

impl UpcallQueue {
    pub(crate) fn new() -> Self {
        UpcallQueue {
            slots: (0..MAX_QUEUE_LEN).map(|_| None).collect(),
            head: 0,
            tail: 0,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.head.wrapping_sub(self.tail) >= MAX_QUEUE_LEN
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Push may only follow a fullness check.
    pub(crate) fn push(&mut self, upcall: Upcall) {
        debug_assert!(!self.is_full());
        let slot = (self.head & QUEUE_MASK) as usize;
        self.slots[slot] = Some(upcall);
        self.head = self.head.wrapping_add(1);
    }

    pub(crate) fn pop(&mut self) -> Option<Upcall> {
        if self.is_empty() {
            return None;
        }
        let slot = (self.tail & QUEUE_MASK) as usize;
        self.tail = self.tail.wrapping_add(1);
        self.slots[slot].take()
    }

    /// Drop everything queued, returning how many records went away.
    pub(crate) fn purge(&mut self) -> usize {
        let mut n = 0;
        while self.pop().is_some() {
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn upcall(tag: u8) -> Upcall {
        Upcall {
            kind: UpcallKind::Miss,
            key: vec![tag],
            userdata: None,
            packet: PacketBuf::from_frame(&[tag; 14]),
        }
    }

    #[test]
    fn fifo_order() {
        let mut q = UpcallQueue::new();
        q.push(upcall(1));
        q.push(upcall(2));
        assert_eq!(q.pop().unwrap().key, vec![1]);
        assert_eq!(q.pop().unwrap().key, vec![2]);
        assert!(q.pop().is_none());
    }

    #[test]
    fn fills_at_capacity() {
        let mut q = UpcallQueue::new();
        for i in 0..MAX_QUEUE_LEN {
            assert!(!q.is_full());
            q.push(upcall(i as u8));
        }
        assert!(q.is_full());
        q.pop().unwrap();
        assert!(!q.is_full());
    }

    #[test]
    fn indices_wrap_cleanly() {
        let mut q = UpcallQueue::new();
        for round in 0..3 * MAX_QUEUE_LEN {
            q.push(upcall(round as u8));
            assert_eq!(q.pop().unwrap().key, vec![round as u8]);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn purge_counts_drained_records() {
        let mut q = UpcallQueue::new();
        for i in 0..5 {
            q.push(upcall(i));
        }
        assert_eq!(q.purge(), 5);
        assert!(q.is_empty());
    }
}
