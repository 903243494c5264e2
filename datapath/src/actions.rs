// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Action programs: the attribute vocabulary, structural validation, and an
//! encoder for clients building programs.
//!
//! An action blob is validated once, when it enters the datapath through
//! flow-put or execute. From then on it is opaque bytes: the interpreter
//! walks it without re-checking, and a malformed record past validation is
//! an internal inconsistency that panics rather than an error.

use crate::key;
use crate::key::{Ipv4Key, Ipv6Key, Mac};
use crate::port::PortNo;
use crate::wire::{attrs, AttrWriter, WireError};

/// Action attribute types.
pub mod attr {
    pub const OUTPUT: u16 = 1;
    pub const USERSPACE: u16 = 2;
    pub const PUSH_VLAN: u16 = 3;
    pub const POP_VLAN: u16 = 4;
    pub const PUSH_MPLS: u16 = 5;
    pub const POP_MPLS: u16 = 6;
    pub const SET: u16 = 7;
    pub const SAMPLE: u16 = 8;
}

/// Attributes nested under USERSPACE.
pub mod userspace_attr {
    pub const USERDATA: u16 = 1;
}

/// Attributes nested under SAMPLE.
pub mod sample_attr {
    pub const PROBABILITY: u16 = 1;
    pub const ACTIONS: u16 = 2;
}

/// A structurally validated action program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActionList {
    bytes: Box<[u8]>,
}

impl ActionList {
    /// Validate `bytes` as an action stream and take an owned copy.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        validate(bytes)?;
        Ok(ActionList {
            bytes: bytes.into(),
        })
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn validate(buf: &[u8]) -> Result<(), WireError> {
    for a in attrs(buf) {
        let a = a?;
        match a.ty {
            attr::OUTPUT => {
                a.u32()?;
            }
            attr::USERSPACE => {
                for n in a.nested() {
                    let n = n?;
                    if n.ty != userspace_attr::USERDATA {
                        return Err(WireError::BadType(n.ty));
                    }
                }
            }
            attr::PUSH_VLAN => {
                a.be16()?;
            }
            attr::POP_VLAN => {
                a.expect_len(0)?;
            }
            attr::PUSH_MPLS => {
                a.expect_len(6)?;
            }
            attr::POP_MPLS => {
                a.be16()?;
            }
            attr::SET => validate_set(&a)?,
            attr::SAMPLE => validate_sample(&a)?,
            other => return Err(WireError::BadType(other)),
        }
    }
    Ok(())
}

fn validate_set(a: &crate::wire::Attr<'_>) -> Result<(), WireError> {
    let mut seen = false;
    for n in a.nested() {
        let n = n?;
        if seen {
            return Err(WireError::BadType(n.ty));
        }
        seen = true;
        match n.ty {
            key::attr::ETHERNET => {
                n.expect_len(12)?;
            }
            key::attr::IPV4 => {
                n.expect_len(12)?;
            }
            key::attr::IPV6 => {
                n.expect_len(40)?;
            }
            key::attr::TCP | key::attr::UDP => {
                n.expect_len(4)?;
            }
            key::attr::MPLS => {
                n.be32()?;
            }
            // No tunnel, priority, or mark support; accepted and ignored.
            key::attr::TUNNEL | key::attr::PRIORITY | key::attr::MARK => {}
            other => return Err(WireError::BadType(other)),
        }
    }
    if seen {
        Ok(())
    } else {
        Err(WireError::Missing("set target"))
    }
}

fn validate_sample(a: &crate::wire::Attr<'_>) -> Result<(), WireError> {
    let mut probability = false;
    let mut actions = false;
    for n in a.nested() {
        let n = n?;
        match n.ty {
            sample_attr::PROBABILITY => {
                n.u32()?;
                probability = true;
            }
            sample_attr::ACTIONS => {
                validate(n.payload)?;
                actions = true;
            }
            other => return Err(WireError::BadType(other)),
        }
    }
    if !probability {
        return Err(WireError::Missing("sample probability"));
    }
    if !actions {
        return Err(WireError::Missing("sample actions"));
    }
    Ok(())
}

/// Builder for action programs.
#[derive(Debug, Default)]
pub struct ActionsEncoder {
    w: AttrWriter,
}

impl ActionsEncoder {
    #[must_use]
    pub fn new() -> Self {
        ActionsEncoder::default()
    }

    pub fn output(&mut self, port: PortNo) {
        self.w.put_u32(attr::OUTPUT, u32::from(port.0));
    }

    pub fn userspace(&mut self, userdata: Option<&[u8]>) {
        let mark = self.w.begin_nested(attr::USERSPACE);
        if let Some(data) = userdata {
            self.w.put(userspace_attr::USERDATA, data);
        }
        self.w.end_nested(mark);
    }

    pub fn push_vlan(&mut self, tci: u16) {
        self.w.put_be16(attr::PUSH_VLAN, tci);
    }

    pub fn pop_vlan(&mut self) {
        self.w.put_empty(attr::POP_VLAN);
    }

    pub fn push_mpls(&mut self, eth_type: u16, lse: u32) {
        let mut p = [0u8; 6];
        p[..2].copy_from_slice(&eth_type.to_be_bytes());
        p[2..].copy_from_slice(&lse.to_be_bytes());
        self.w.put(attr::PUSH_MPLS, &p);
    }

    pub fn pop_mpls(&mut self, eth_type: u16) {
        self.w.put_be16(attr::POP_MPLS, eth_type);
    }

    pub fn set_eth(&mut self, src: Mac, dst: Mac) {
        let mut p = [0u8; 12];
        p[..6].copy_from_slice(&src.0);
        p[6..].copy_from_slice(&dst.0);
        let mark = self.w.begin_nested(attr::SET);
        self.w.put(key::attr::ETHERNET, &p);
        self.w.end_nested(mark);
    }

    pub fn set_ipv4(&mut self, v4: &Ipv4Key) {
        let mut p = [0u8; 12];
        p[..4].copy_from_slice(&v4.src.octets());
        p[4..8].copy_from_slice(&v4.dst.octets());
        p[8] = v4.proto;
        p[9] = v4.tos;
        p[10] = v4.ttl;
        let mark = self.w.begin_nested(attr::SET);
        self.w.put(key::attr::IPV4, &p);
        self.w.end_nested(mark);
    }

    pub fn set_ipv6(&mut self, v6: &Ipv6Key) {
        let mut p = [0u8; 40];
        p[..16].copy_from_slice(&v6.src.octets());
        p[16..32].copy_from_slice(&v6.dst.octets());
        p[32..36].copy_from_slice(&v6.label.to_be_bytes());
        p[36] = v6.proto;
        p[37] = v6.tclass;
        p[38] = v6.hlimit;
        let mark = self.w.begin_nested(attr::SET);
        self.w.put(key::attr::IPV6, &p);
        self.w.end_nested(mark);
    }

    pub fn set_tcp_ports(&mut self, src: u16, dst: u16) {
        self.set_ports(key::attr::TCP, src, dst);
    }

    pub fn set_udp_ports(&mut self, src: u16, dst: u16) {
        self.set_ports(key::attr::UDP, src, dst);
    }

    fn set_ports(&mut self, ty: u16, src: u16, dst: u16) {
        let mut p = [0u8; 4];
        p[..2].copy_from_slice(&src.to_be_bytes());
        p[2..].copy_from_slice(&dst.to_be_bytes());
        let mark = self.w.begin_nested(attr::SET);
        self.w.put(ty, &p);
        self.w.end_nested(mark);
    }

    pub fn set_mpls_lse(&mut self, lse: u32) {
        let mark = self.w.begin_nested(attr::SET);
        self.w.put_be32(key::attr::MPLS, lse);
        self.w.end_nested(mark);
    }

    /// Sample: run `nested` with probability `probability` / 2^32.
    pub fn sample(&mut self, probability: u32, nested: &ActionList) {
        let mark = self.w.begin_nested(attr::SAMPLE);
        self.w.put_u32(sample_attr::PROBABILITY, probability);
        self.w.put(sample_attr::ACTIONS, nested.bytes());
        self.w.end_nested(mark);
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.w.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn well_formed_program_validates() {
        let mut enc = ActionsEncoder::new();
        enc.push_vlan(0x1064);
        enc.set_eth(Mac([1; 6]), Mac([2; 6]));
        enc.userspace(Some(&[7, 7]));
        enc.output(PortNo(3));
        let blob = enc.finish();

        let list = ActionList::from_bytes(&blob).unwrap();
        assert_eq!(list.bytes(), &blob[..]);
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        let mut w = AttrWriter::new();
        w.put_u32(99, 0);
        assert_eq!(
            ActionList::from_bytes(&w.finish()),
            Err(WireError::BadType(99))
        );
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let mut enc = ActionsEncoder::new();
        enc.output(PortNo(1));
        let mut blob = enc.finish();
        blob.truncate(blob.len() - 2);
        assert!(matches!(
            ActionList::from_bytes(&blob),
            Err(WireError::Truncated(_))
        ));
    }

    #[test]
    fn set_of_non_settable_key_is_rejected() {
        let mut w = AttrWriter::new();
        let mark = w.begin_nested(attr::SET);
        w.put_u32(crate::key::attr::IN_PORT, 4);
        w.end_nested(mark);
        assert_eq!(
            ActionList::from_bytes(&w.finish()),
            Err(WireError::BadType(crate::key::attr::IN_PORT))
        );
    }

    #[test]
    fn sample_requires_probability_and_actions() {
        let mut inner = ActionsEncoder::new();
        inner.output(PortNo(2));
        let inner = ActionList::from_bytes(&inner.finish()).unwrap();

        let mut enc = ActionsEncoder::new();
        enc.sample(u32::MAX / 2, &inner);
        assert!(ActionList::from_bytes(&enc.finish()).is_ok());

        let mut w = AttrWriter::new();
        let mark = w.begin_nested(attr::SAMPLE);
        w.put_u32(sample_attr::PROBABILITY, 17);
        w.end_nested(mark);
        assert_eq!(
            ActionList::from_bytes(&w.finish()),
            Err(WireError::Missing("sample actions"))
        );
    }

    #[test]
    fn empty_program_is_valid() {
        assert!(ActionList::from_bytes(&[]).is_ok());
    }
}
