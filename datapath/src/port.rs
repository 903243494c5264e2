// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port numbering and the per-datapath port table.

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use netdev::Netdev;

use crate::MAX_PORTS;

/// A port slot number, or one of the key-schema sentinels.
#[must_use]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PortNo(pub u16);

impl PortNo {
    /// Slot of the datapath-local port.
    pub const LOCAL: PortNo = PortNo(0);
    /// Smallest value the key schema does not treat as a real slot.
    pub const MAX: PortNo = PortNo(0xff00);
    /// Key-schema sentinel naming the local port.
    pub const LOCAL_REF: PortNo = PortNo(0xfffe);
    /// Key-schema sentinel meaning "no port".
    pub const NONE: PortNo = PortNo(0xffff);

    /// A key's ingress port must reference a real slot or be one of the
    /// reserved sentinels.
    #[must_use]
    pub fn valid_in_key(self) -> bool {
        if self < PortNo::MAX {
            usize::from(self.0) < MAX_PORTS
        } else {
            self == PortNo::LOCAL_REF || self == PortNo::NONE
        }
    }
}

impl core::fmt::Display for PortNo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            PortNo::LOCAL_REF => write!(f, "local"),
            PortNo::NONE => write!(f, "none"),
            PortNo(n) => write!(f, "{n}"),
        }
    }
}

/// What the provider reports about a port.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortDesc {
    pub name: String,
    /// Port type as the caller requested it (not the resolved backend).
    pub kind: String,
    pub port_no: PortNo,
}

pub(crate) type SharedNetdev = Arc<Mutex<Box<dyn Netdev>>>;

pub(crate) struct Port {
    pub(crate) port_no: PortNo,
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) rx_fd: Option<RawFd>,
    pub(crate) netdev: SharedNetdev,
}

impl Port {
    pub(crate) fn desc(&self) -> PortDesc {
        PortDesc {
            name: self.name.clone(),
            kind: self.kind.clone(),
            port_no: self.port_no,
        }
    }
}

/// Fixed slots plus the sibling list in insertion order.
pub(crate) struct PortTable {
    slots: Vec<Option<Port>>,
    order: Vec<PortNo>,
}

impl PortTable {
    pub(crate) fn new() -> Self {
        PortTable {
            slots: (0..MAX_PORTS).map(|_| None).collect(),
            order: Vec::new(),
        }
    }

    pub(crate) fn get(&self, port_no: PortNo) -> Option<&Port> {
        self.slots.get(usize::from(port_no.0))?.as_ref()
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<&Port> {
        self.iter().find(|p| p.name == name)
    }

    pub(crate) fn is_free(&self, slot: u16) -> bool {
        usize::from(slot) < MAX_PORTS && self.slots[usize::from(slot)].is_none()
    }

    pub(crate) fn insert(&mut self, port: Port) {
        let slot = usize::from(port.port_no.0);
        debug_assert!(self.slots[slot].is_none());
        self.order.push(port.port_no);
        self.slots[slot] = Some(port);
    }

    pub(crate) fn remove(&mut self, port_no: PortNo) -> Option<Port> {
        let port = self.slots.get_mut(usize::from(port_no.0))?.take()?;
        self.order.retain(|no| *no != port_no);
        Some(port)
    }

    /// Ports in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Port> {
        self.order.iter().filter_map(|no| self.get(*no))
    }

    /// Pick a slot for a port the caller did not number.
    ///
    /// The name-derived heuristics only apply to the dummy class, where
    /// predictable numbers make tests readable; the real class always takes
    /// the first free slot.
    pub(crate) fn choose(&self, name: &str, heuristics: bool) -> Option<u16> {
        if heuristics {
            let start: u32 = if name.starts_with("br") { 100 } else { 0 };
            if let Some(pos) = name.find(|c: char| c.is_ascii_digit()) {
                let digits: String = name[pos..]
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect();
                if let Ok(n) = digits.parse::<u32>() {
                    let n = start + n;
                    if n > 0 && n < MAX_PORTS as u32 && self.is_free(n as u16) {
                        return Some(n as u16);
                    }
                }
            }
        }
        (1..MAX_PORTS as u16).find(|slot| self.is_free(*slot))
    }

    /// Slot-ordered dump: the occupied port at or after `cursor`, plus the
    /// cursor to continue from.
    pub(crate) fn dump_from(&self, cursor: u16) -> Option<(PortDesc, u16)> {
        (cursor..MAX_PORTS as u16).find_map(|slot| {
            self.get(PortNo(slot)).map(|p| (p.desc(), slot + 1))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn port(no: u16, name: &str) -> Port {
        Port {
            port_no: PortNo(no),
            name: name.to_string(),
            kind: "dummy".to_string(),
            rx_fd: None,
            netdev: Arc::new(Mutex::new(netdev::open(name, "dummy").unwrap())),
        }
    }

    #[test]
    fn sentinels_and_slots_validate() {
        assert!(PortNo(0).valid_in_key());
        assert!(PortNo(255).valid_in_key());
        assert!(!PortNo(256).valid_in_key());
        assert!(!PortNo(0xfe00).valid_in_key());
        assert!(PortNo::LOCAL_REF.valid_in_key());
        assert!(PortNo::NONE.valid_in_key());
    }

    #[test]
    fn name_heuristics_pick_predictable_slots() {
        let mut t = PortTable::new();
        t.insert(port(0, "local"));

        assert_eq!(t.choose("br5", true), Some(105));
        assert_eq!(t.choose("eth3", true), Some(3));
        assert_eq!(t.choose("zzz", true), Some(1));
        // Without heuristics the name does not matter.
        assert_eq!(t.choose("eth3", false), Some(1));
    }

    #[test]
    fn digit_slot_falls_back_when_taken() {
        let mut t = PortTable::new();
        t.insert(port(3, "a3"));
        assert_eq!(t.choose("eth3", true), Some(1));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut t = PortTable::new();
        t.insert(port(5, "five"));
        t.insert(port(2, "two"));
        t.insert(port(9, "nine"));
        let names: Vec<_> = t.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["five", "two", "nine"]);

        t.remove(PortNo(2)).unwrap();
        let names: Vec<_> = t.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["five", "nine"]);
    }

    #[test]
    fn dump_walks_slots_in_order() {
        let mut t = PortTable::new();
        t.insert(port(5, "five"));
        t.insert(port(2, "two"));

        let (d1, c) = t.dump_from(0).unwrap();
        assert_eq!((d1.port_no, c), (PortNo(2), 3));
        let (d2, c) = t.dump_from(c).unwrap();
        assert_eq!((d2.port_no, c), (PortNo(5), 6));
        assert!(t.dump_from(c).is_none());
    }
}
