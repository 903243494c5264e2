// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Canonical flow keys: extraction from raw frames and the TLV codec.
//!
//! A [`FlowKey`] is the exact-match descriptor the flow table is keyed by.
//! It is fixed-size, `Copy`, and compared/hashed structurally, so two frames
//! classify identically iff their keys are equal. The same key also travels
//! across the provider interface as an attribute stream; [`FlowKey::encode`]
//! and [`FlowKey::decode`] are inverses for every key the extractor produces.

use std::net::{Ipv4Addr, Ipv6Addr};

use etherparse::{Ipv4Header, Ipv6Extensions, Ipv6Header, TcpHeader, UdpHeader};

use crate::port::PortNo;
use crate::wire::{attrs, AttrWriter, WireError};
use crate::ETH_HEADER_LEN;

pub const ETH_TYPE_IP: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_VLAN: u16 = 0x8100;
pub const ETH_TYPE_IPV6: u16 = 0x86dd;
pub const ETH_TYPE_MPLS: u16 = 0x8847;
pub const ETH_TYPE_MPLS_MCAST: u16 = 0x8848;

/// Pseudo ethertype recorded for frames that carry an 802.3 length field
/// rather than an Ethernet II type.
pub const ETH_TYPE_NONE: u16 = 0x05ff;

/// Bit set in an extracted TCI to mark that a tag was present at all, so a
/// tag of zero remains distinguishable from "untagged".
pub const VLAN_TAG_PRESENT: u16 = 0x1000;

/// Key attribute types of the wire format.
pub mod attr {
    pub const IN_PORT: u16 = 1;
    pub const ETHERNET: u16 = 2;
    pub const VLAN: u16 = 3;
    pub const ETHERTYPE: u16 = 4;
    pub const IPV4: u16 = 5;
    pub const IPV6: u16 = 6;
    pub const ARP: u16 = 7;
    pub const MPLS: u16 = 8;
    pub const TCP: u16 = 9;
    pub const UDP: u16 = 10;
    pub const ICMP: u16 = 11;
    pub const ICMPV6: u16 = 12;
    /// Set-action targets accepted and ignored (no tunnel support).
    pub const TUNNEL: u16 = 13;
    pub const PRIORITY: u16 = 14;
    pub const MARK: u16 = 15;
}

/// An Ethernet MAC address.
#[must_use]
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const ZERO: Mac = Mac([0; 6]);
}

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl core::fmt::Display for Mac {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// IP fragmentation state of a keyed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragKind {
    /// Not a fragment.
    None,
    /// First fragment; L4 headers are present.
    First,
    /// Later fragment; no L4 key is extracted.
    Later,
}

impl FragKind {
    fn as_u8(self) -> u8 {
        match self {
            FragKind::None => 0,
            FragKind::First => 1,
            FragKind::Later => 2,
        }
    }

    fn from_u8(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(FragKind::None),
            1 => Ok(FragKind::First),
            2 => Ok(FragKind::Later),
            _ => Err(WireError::BadLength {
                ty: attr::IPV4,
                len: usize::from(v),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Key {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    pub tos: u8,
    pub ttl: u8,
    pub frag: FragKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Key {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub label: u32,
    pub proto: u8,
    pub tclass: u8,
    pub hlimit: u8,
    pub frag: FragKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArpKey {
    pub sip: Ipv4Addr,
    pub tip: Ipv4Addr,
    pub op: u16,
    pub sha: Mac,
    pub tha: Mac,
}

/// Network-layer part of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L3Key {
    None,
    Ipv4(Ipv4Key),
    Ipv6(Ipv6Key),
    Arp(ArpKey),
    Mpls { lse: u32 },
}

/// Transport-layer part of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Key {
    None,
    Tcp { src: u16, dst: u16 },
    Udp { src: u16, dst: u16 },
    Icmp { ty: u8, code: u8 },
    Icmpv6 { ty: u8, code: u8 },
}

/// The canonical exact-match descriptor of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub in_port: PortNo,
    pub eth_src: Mac,
    pub eth_dst: Mac,
    /// Outermost 802.1Q TCI with [`VLAN_TAG_PRESENT`] set, if tagged.
    pub vlan_tci: Option<u16>,
    /// Ethernet II type after any tags; [`ETH_TYPE_NONE`] for 802.3 frames.
    pub eth_type: u16,
    pub l3: L3Key,
    pub l4: L4Key,
}

fn be16_at(frame: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_be_bytes([
        *frame.get(off)?,
        *frame.get(off + 1)?,
    ]))
}

/// Parse a raw frame into its canonical key.
///
/// Returns `None` for frames shorter than an Ethernet header; those are
/// discarded before they reach the flow table.
#[must_use]
pub fn extract(frame: &[u8], in_port: PortNo) -> Option<FlowKey> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }

    let eth_dst = Mac([frame[0], frame[1], frame[2], frame[3], frame[4], frame[5]]);
    let eth_src = Mac([frame[6], frame[7], frame[8], frame[9], frame[10], frame[11]]);

    let mut off = 12;
    let mut eth_type = be16_at(frame, off).unwrap_or(0);
    off += 2;

    // Only the outermost tag contributes to the key.
    let mut vlan_tci = None;
    if eth_type == ETH_TYPE_VLAN {
        match (be16_at(frame, off), be16_at(frame, off + 2)) {
            (Some(tci), Some(inner)) => {
                vlan_tci = Some(tci | VLAN_TAG_PRESENT);
                eth_type = inner;
                off += 4;
            }
            _ => {
                // Tag header ran off the end of the frame.
                return Some(FlowKey {
                    in_port,
                    eth_src,
                    eth_dst,
                    vlan_tci: None,
                    eth_type: ETH_TYPE_NONE,
                    l3: L3Key::None,
                    l4: L4Key::None,
                });
            }
        }
    }
    if eth_type < 0x600 {
        eth_type = ETH_TYPE_NONE;
    }

    let rest = &frame[off.min(frame.len())..];
    let (l3, l4) = extract_l3(eth_type, rest);

    Some(FlowKey {
        in_port,
        eth_src,
        eth_dst,
        vlan_tci,
        eth_type,
        l3,
        l4,
    })
}

fn extract_l3(eth_type: u16, rest: &[u8]) -> (L3Key, L4Key) {
    match eth_type {
        ETH_TYPE_IP => extract_ipv4(rest),
        ETH_TYPE_IPV6 => extract_ipv6(rest),
        ETH_TYPE_ARP => (extract_arp(rest), L4Key::None),
        ETH_TYPE_MPLS | ETH_TYPE_MPLS_MCAST => {
            let lse = match rest {
                [a, b, c, d, ..] => u32::from_be_bytes([*a, *b, *c, *d]),
                _ => return (L3Key::None, L4Key::None),
            };
            (L3Key::Mpls { lse }, L4Key::None)
        }
        _ => (L3Key::None, L4Key::None),
    }
}

fn extract_ipv4(rest: &[u8]) -> (L3Key, L4Key) {
    let Ok((ip, payload)) = Ipv4Header::from_slice(rest) else {
        return (L3Key::None, L4Key::None);
    };
    let frag = if ip.is_fragmenting_payload() {
        if ip.fragment_offset.value() == 0 {
            FragKind::First
        } else {
            FragKind::Later
        }
    } else {
        FragKind::None
    };
    let key = Ipv4Key {
        src: Ipv4Addr::from(ip.source),
        dst: Ipv4Addr::from(ip.destination),
        proto: ip.protocol.0,
        tos: (ip.dscp.value() << 2) | ip.ecn.value(),
        ttl: ip.time_to_live,
        frag,
    };
    let l4 = if frag == FragKind::Later {
        L4Key::None
    } else {
        extract_l4(ip.protocol.0, payload)
    };
    (L3Key::Ipv4(key), l4)
}

fn extract_ipv6(rest: &[u8]) -> (L3Key, L4Key) {
    let Ok((ip, payload)) = Ipv6Header::from_slice(rest) else {
        return (L3Key::None, L4Key::None);
    };
    let (proto, after_exts, frag) =
        match Ipv6Extensions::from_slice(ip.next_header, payload) {
            Ok((exts, next, after)) => {
                let frag = match &exts.fragment {
                    Some(f) if f.is_fragmenting_payload() => {
                        if f.fragment_offset.value() == 0 {
                            FragKind::First
                        } else {
                            FragKind::Later
                        }
                    }
                    _ => FragKind::None,
                };
                (next.0, after, frag)
            }
            Err(_) => (ip.next_header.0, &[][..], FragKind::None),
        };
    let key = Ipv6Key {
        src: Ipv6Addr::from(ip.source),
        dst: Ipv6Addr::from(ip.destination),
        label: ip.flow_label.value(),
        proto,
        tclass: ip.traffic_class,
        hlimit: ip.hop_limit,
        frag,
    };
    let l4 = if frag == FragKind::Later {
        L4Key::None
    } else {
        extract_l4(proto, after_exts)
    };
    (L3Key::Ipv6(key), l4)
}

fn extract_arp(rest: &[u8]) -> L3Key {
    // htype(2) ptype(2) hlen(1) plen(1) op(2) sha(6) sip(4) tha(6) tip(4)
    if rest.len() < 28 {
        return L3Key::None;
    }
    let htype = u16::from_be_bytes([rest[0], rest[1]]);
    let ptype = u16::from_be_bytes([rest[2], rest[3]]);
    if htype != 1 || ptype != ETH_TYPE_IP || rest[4] != 6 || rest[5] != 4 {
        return L3Key::None;
    }
    L3Key::Arp(ArpKey {
        op: u16::from_be_bytes([rest[6], rest[7]]),
        sha: Mac([rest[8], rest[9], rest[10], rest[11], rest[12], rest[13]]),
        sip: Ipv4Addr::new(rest[14], rest[15], rest[16], rest[17]),
        tha: Mac([rest[18], rest[19], rest[20], rest[21], rest[22], rest[23]]),
        tip: Ipv4Addr::new(rest[24], rest[25], rest[26], rest[27]),
    })
}

fn extract_l4(proto: u8, payload: &[u8]) -> L4Key {
    match proto {
        6 => match TcpHeader::from_slice(payload) {
            Ok((tcp, _)) => L4Key::Tcp {
                src: tcp.source_port,
                dst: tcp.destination_port,
            },
            Err(_) => L4Key::None,
        },
        17 => match UdpHeader::from_slice(payload) {
            Ok((udp, _)) => L4Key::Udp {
                src: udp.source_port,
                dst: udp.destination_port,
            },
            Err(_) => L4Key::None,
        },
        1 => match payload {
            [ty, code, ..] => L4Key::Icmp {
                ty: *ty,
                code: *code,
            },
            _ => L4Key::None,
        },
        58 => match payload {
            [ty, code, ..] => L4Key::Icmpv6 {
                ty: *ty,
                code: *code,
            },
            _ => L4Key::None,
        },
        _ => L4Key::None,
    }
}

impl FlowKey {
    /// Serialize to the canonical attribute stream.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = AttrWriter::new();
        w.put_u32(attr::IN_PORT, u32::from(self.in_port.0));

        let mut eth = [0u8; 12];
        eth[..6].copy_from_slice(&self.eth_src.0);
        eth[6..].copy_from_slice(&self.eth_dst.0);
        w.put(attr::ETHERNET, &eth);

        if let Some(tci) = self.vlan_tci {
            w.put_be16(attr::VLAN, tci);
        }
        w.put_be16(attr::ETHERTYPE, self.eth_type);

        match self.l3 {
            L3Key::None => {}
            L3Key::Ipv4(v4) => {
                let mut p = [0u8; 12];
                p[..4].copy_from_slice(&v4.src.octets());
                p[4..8].copy_from_slice(&v4.dst.octets());
                p[8] = v4.proto;
                p[9] = v4.tos;
                p[10] = v4.ttl;
                p[11] = v4.frag.as_u8();
                w.put(attr::IPV4, &p);
            }
            L3Key::Ipv6(v6) => {
                let mut p = [0u8; 40];
                p[..16].copy_from_slice(&v6.src.octets());
                p[16..32].copy_from_slice(&v6.dst.octets());
                p[32..36].copy_from_slice(&v6.label.to_be_bytes());
                p[36] = v6.proto;
                p[37] = v6.tclass;
                p[38] = v6.hlimit;
                p[39] = v6.frag.as_u8();
                w.put(attr::IPV6, &p);
            }
            L3Key::Arp(arp) => {
                let mut p = [0u8; 22];
                p[..4].copy_from_slice(&arp.sip.octets());
                p[4..8].copy_from_slice(&arp.tip.octets());
                p[8..10].copy_from_slice(&arp.op.to_be_bytes());
                p[10..16].copy_from_slice(&arp.sha.0);
                p[16..22].copy_from_slice(&arp.tha.0);
                w.put(attr::ARP, &p);
            }
            L3Key::Mpls { lse } => w.put_be32(attr::MPLS, lse),
        }

        match self.l4 {
            L4Key::None => {}
            L4Key::Tcp { src, dst } => put_ports(&mut w, attr::TCP, src, dst),
            L4Key::Udp { src, dst } => put_ports(&mut w, attr::UDP, src, dst),
            L4Key::Icmp { ty, code } => w.put(attr::ICMP, &[ty, code]),
            L4Key::Icmpv6 { ty, code } => w.put(attr::ICMPV6, &[ty, code]),
        }

        w.finish()
    }

    /// Parse a serialized key back into canonical form.
    pub fn decode(buf: &[u8]) -> Result<FlowKey, WireError> {
        let mut in_port = None;
        let mut eth = None;
        let mut vlan_tci = None;
        let mut eth_type = None;
        let mut l3 = L3Key::None;
        let mut l4 = L4Key::None;

        for a in attrs(buf) {
            let a = a?;
            match a.ty {
                attr::IN_PORT => in_port = Some(PortNo(a.u32()? as u16)),
                attr::ETHERNET => {
                    let p = a.expect_len(12)?;
                    let mut src = [0u8; 6];
                    let mut dst = [0u8; 6];
                    src.copy_from_slice(&p[..6]);
                    dst.copy_from_slice(&p[6..]);
                    eth = Some((Mac(src), Mac(dst)));
                }
                attr::VLAN => vlan_tci = Some(a.be16()?),
                attr::ETHERTYPE => eth_type = Some(a.be16()?),
                attr::IPV4 => {
                    let p = a.expect_len(12)?;
                    l3 = L3Key::Ipv4(Ipv4Key {
                        src: Ipv4Addr::new(p[0], p[1], p[2], p[3]),
                        dst: Ipv4Addr::new(p[4], p[5], p[6], p[7]),
                        proto: p[8],
                        tos: p[9],
                        ttl: p[10],
                        frag: FragKind::from_u8(p[11])?,
                    });
                }
                attr::IPV6 => {
                    let p = a.expect_len(40)?;
                    let mut src = [0u8; 16];
                    let mut dst = [0u8; 16];
                    src.copy_from_slice(&p[..16]);
                    dst.copy_from_slice(&p[16..32]);
                    l3 = L3Key::Ipv6(Ipv6Key {
                        src: Ipv6Addr::from(src),
                        dst: Ipv6Addr::from(dst),
                        label: u32::from_be_bytes([p[32], p[33], p[34], p[35]]),
                        proto: p[36],
                        tclass: p[37],
                        hlimit: p[38],
                        frag: FragKind::from_u8(p[39])?,
                    });
                }
                attr::ARP => {
                    let p = a.expect_len(22)?;
                    let mut sha = [0u8; 6];
                    let mut tha = [0u8; 6];
                    sha.copy_from_slice(&p[10..16]);
                    tha.copy_from_slice(&p[16..22]);
                    l3 = L3Key::Arp(ArpKey {
                        sip: Ipv4Addr::new(p[0], p[1], p[2], p[3]),
                        tip: Ipv4Addr::new(p[4], p[5], p[6], p[7]),
                        op: u16::from_be_bytes([p[8], p[9]]),
                        sha: Mac(sha),
                        tha: Mac(tha),
                    });
                }
                attr::MPLS => l3 = L3Key::Mpls { lse: a.be32()? },
                attr::TCP => l4 = decode_ports(&a, |src, dst| L4Key::Tcp { src, dst })?,
                attr::UDP => l4 = decode_ports(&a, |src, dst| L4Key::Udp { src, dst })?,
                attr::ICMP => {
                    let p = a.expect_len(2)?;
                    l4 = L4Key::Icmp {
                        ty: p[0],
                        code: p[1],
                    };
                }
                attr::ICMPV6 => {
                    let p = a.expect_len(2)?;
                    l4 = L4Key::Icmpv6 {
                        ty: p[0],
                        code: p[1],
                    };
                }
                other => return Err(WireError::BadType(other)),
            }
        }

        let in_port = in_port.ok_or(WireError::Missing("in-port"))?;
        let (eth_src, eth_dst) = eth.ok_or(WireError::Missing("ethernet"))?;
        let eth_type = eth_type.ok_or(WireError::Missing("ethertype"))?;
        Ok(FlowKey {
            in_port,
            eth_src,
            eth_dst,
            vlan_tci,
            eth_type,
            l3,
            l4,
        })
    }
}

fn put_ports(w: &mut AttrWriter, ty: u16, src: u16, dst: u16) {
    let mut p = [0u8; 4];
    p[..2].copy_from_slice(&src.to_be_bytes());
    p[2..].copy_from_slice(&dst.to_be_bytes());
    w.put(ty, &p);
}

fn decode_ports(
    a: &crate::wire::Attr<'_>,
    mk: impl Fn(u16, u16) -> L4Key,
) -> Result<L4Key, WireError> {
    let p = a.expect_len(4)?;
    Ok(mk(
        u16::from_be_bytes([p[0], p[1]]),
        u16::from_be_bytes([p[2], p[3]]),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::test_utils::{ipv4_frame, udp_frame, vlan_frame};
    use proptest::prelude::*;

    #[test]
    fn short_frame_is_discarded() {
        assert!(extract(&[0u8; 13], PortNo(1)).is_none());
    }

    #[test]
    fn untagged_udp() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 5353, 53);
        let key = extract(&frame, PortNo(4)).unwrap();
        assert_eq!(key.in_port, PortNo(4));
        assert_eq!(key.eth_type, ETH_TYPE_IP);
        assert_eq!(key.vlan_tci, None);
        match key.l3 {
            L3Key::Ipv4(v4) => {
                assert_eq!(v4.src, "10.0.0.1".parse::<std::net::Ipv4Addr>().unwrap());
                assert_eq!(v4.proto, 17);
            }
            other => panic!("wrong l3: {other:?}"),
        }
        assert_eq!(key.l4, L4Key::Udp { src: 5353, dst: 53 });
    }

    #[test]
    fn tagged_frame_records_tci() {
        let inner = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        let frame = vlan_frame(&inner, 0x0064);
        let key = extract(&frame, PortNo(1)).unwrap();
        assert_eq!(key.vlan_tci, Some(0x0064 | VLAN_TAG_PRESENT));
        assert_eq!(key.eth_type, ETH_TYPE_IP);
    }

    #[test]
    fn later_fragment_has_no_l4() {
        let mut frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        // Fragment offset 8, set directly in the IP header.
        frame[20] = 0x00;
        frame[21] = 0x01;
        let key = extract(&frame, PortNo(1)).unwrap();
        match key.l3 {
            L3Key::Ipv4(v4) => assert_eq!(v4.frag, FragKind::Later),
            other => panic!("wrong l3: {other:?}"),
        }
        assert_eq!(key.l4, L4Key::None);
    }

    #[test]
    fn length_field_frames_have_no_type() {
        let mut frame = ipv4_frame("1.1.1.1", "2.2.2.2", 6, &[0u8; 20]);
        frame[12] = 0x00;
        frame[13] = 0x40;
        let key = extract(&frame, PortNo(1)).unwrap();
        assert_eq!(key.eth_type, ETH_TYPE_NONE);
        assert_eq!(key.l3, L3Key::None);
    }

    #[test]
    fn extracted_keys_round_trip() {
        let frames = [
            udp_frame("10.0.0.1", "10.0.0.2", 5353, 53),
            ipv4_frame("192.168.0.1", "192.168.0.2", 1, &[8, 0, 0, 0, 0, 0, 0, 0]),
            vlan_frame(&udp_frame("10.0.0.1", "10.0.0.2", 67, 68), 0x123),
        ];
        for frame in &frames {
            let key = extract(frame, PortNo(7)).unwrap();
            let encoded = key.encode();
            assert_eq!(FlowKey::decode(&encoded).unwrap(), key);
            // And the emit direction is stable too.
            assert_eq!(FlowKey::decode(&encoded).unwrap().encode(), encoded);
        }
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let mut w = AttrWriter::new();
        w.put_u32(200, 1);
        assert_eq!(
            FlowKey::decode(&w.finish()),
            Err(WireError::BadType(200))
        );
    }

    fn arb_frag() -> impl Strategy<Value = FragKind> {
        prop_oneof![
            Just(FragKind::None),
            Just(FragKind::First),
            Just(FragKind::Later)
        ]
    }

    fn arb_l3() -> impl Strategy<Value = (u16, L3Key)> {
        prop_oneof![
            Just((ETH_TYPE_NONE, L3Key::None)),
            (any::<[u8; 4]>(), any::<[u8; 4]>(), any::<(u8, u8, u8)>(), arb_frag()).prop_map(
                |(s, d, (proto, tos, ttl), frag)| {
                    (
                        ETH_TYPE_IP,
                        L3Key::Ipv4(Ipv4Key {
                            src: s.into(),
                            dst: d.into(),
                            proto,
                            tos,
                            ttl,
                            frag,
                        }),
                    )
                }
            ),
            (any::<[u8; 16]>(), any::<[u8; 16]>(), 0u32..(1 << 20), any::<(u8, u8, u8)>())
                .prop_map(|(s, d, label, (proto, tclass, hlimit))| {
                    (
                        ETH_TYPE_IPV6,
                        L3Key::Ipv6(Ipv6Key {
                            src: s.into(),
                            dst: d.into(),
                            label,
                            proto,
                            tclass,
                            hlimit,
                            frag: FragKind::None,
                        }),
                    )
                }),
            any::<u32>().prop_map(|lse| (ETH_TYPE_MPLS, L3Key::Mpls { lse })),
            (any::<[u8; 4]>(), any::<[u8; 4]>(), any::<u16>(), any::<[u8; 6]>(), any::<[u8; 6]>())
                .prop_map(|(sip, tip, op, sha, tha)| {
                    (
                        ETH_TYPE_ARP,
                        L3Key::Arp(ArpKey {
                            sip: sip.into(),
                            tip: tip.into(),
                            op,
                            sha: Mac(sha),
                            tha: Mac(tha),
                        }),
                    )
                }),
        ]
    }

    fn arb_l4() -> impl Strategy<Value = L4Key> {
        prop_oneof![
            Just(L4Key::None),
            (any::<u16>(), any::<u16>()).prop_map(|(src, dst)| L4Key::Tcp { src, dst }),
            (any::<u16>(), any::<u16>()).prop_map(|(src, dst)| L4Key::Udp { src, dst }),
            (any::<u8>(), any::<u8>()).prop_map(|(ty, code)| L4Key::Icmp { ty, code }),
        ]
    }

    proptest! {
        #[test]
        fn codec_round_trips(
            port in 0u16..256,
            src in any::<[u8; 6]>(),
            dst in any::<[u8; 6]>(),
            tci in proptest::option::of(any::<u16>()),
            l3 in arb_l3(),
            l4 in arb_l4(),
        ) {
            let key = FlowKey {
                in_port: PortNo(port),
                eth_src: Mac(src),
                eth_dst: Mac(dst),
                vlan_tci: tci,
                eth_type: l3.0,
                l3: l3.1,
                l4,
            };
            let encoded = key.encode();
            prop_assert_eq!(FlowKey::decode(&encoded).unwrap(), key);
            prop_assert_eq!(FlowKey::decode(&encoded).unwrap().encode(), encoded);
        }
    }
}
