// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Owned frames and the header rewrites the action interpreter applies.
//!
//! A [`PacketBuf`] owns one Ethernet frame with spare headroom in front, so
//! pushing a VLAN tag or an MPLS label stack entry is a short copy rather
//! than a reallocation. All rewrites are best-effort: an edit that does not
//! apply to the packet at hand (popping a tag that is not there, setting
//! TCP ports on a non-TCP packet) is a no-op.

use crate::checksum;
use crate::key::{Mac, ETH_TYPE_IP, ETH_TYPE_IPV6, ETH_TYPE_MPLS, ETH_TYPE_MPLS_MCAST, ETH_TYPE_VLAN};
use crate::{HEADROOM, VLAN_HEADER_LEN};

/// One owned Ethernet frame with headroom.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketBuf {
    data: Vec<u8>,
    start: usize,
}

fn be16(b: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*b.get(off)?, *b.get(off + 1)?]))
}

/// Offset of the last ethertype field, skipping any 802.1Q tags.
fn eth_type_offset(b: &[u8]) -> Option<usize> {
    let mut off = 12;
    while be16(b, off)? == ETH_TYPE_VLAN {
        off += VLAN_HEADER_LEN;
    }
    Some(off)
}

fn is_mpls(ty: u16) -> bool {
    ty == ETH_TYPE_MPLS || ty == ETH_TYPE_MPLS_MCAST
}

impl PacketBuf {
    /// Copy `frame` into an owned buffer with the standard headroom.
    #[must_use]
    pub fn from_frame(frame: &[u8]) -> Self {
        let mut data = Vec::with_capacity(HEADROOM + frame.len());
        data.resize(HEADROOM, 0);
        data.extend_from_slice(frame);
        PacketBuf {
            data,
            start: HEADROOM,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.start..]
    }

    #[must_use]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start..]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn grow_front(&mut self, n: usize) {
        if self.start >= n {
            self.start -= n;
        } else {
            let short = n - self.start;
            self.data.splice(0..0, std::iter::repeat(0u8).take(short));
            self.start = 0;
        }
    }

    fn shrink_front(&mut self, n: usize) {
        debug_assert!(self.start + n <= self.data.len());
        self.start += n;
    }

    /// Insert an outermost 802.1Q tag carrying `tci`.
    pub fn push_vlan(&mut self, tci: u16) {
        if self.len() < 12 {
            return;
        }
        self.grow_front(VLAN_HEADER_LEN);
        let b = self.bytes_mut();
        b.copy_within(VLAN_HEADER_LEN..VLAN_HEADER_LEN + 12, 0);
        b[12..14].copy_from_slice(&ETH_TYPE_VLAN.to_be_bytes());
        b[14..16].copy_from_slice(&tci.to_be_bytes());
    }

    /// Remove the outermost 802.1Q tag, if any.
    pub fn pop_vlan(&mut self) {
        let b = self.bytes();
        if b.len() < 12 + VLAN_HEADER_LEN + 2 || be16(b, 12) != Some(ETH_TYPE_VLAN) {
            return;
        }
        self.bytes_mut().copy_within(0..12, VLAN_HEADER_LEN);
        self.shrink_front(VLAN_HEADER_LEN);
    }

    /// Insert an MPLS label stack entry and rewrite the ethertype.
    pub fn push_mpls(&mut self, eth_type: u16, lse: u32) {
        if !is_mpls(eth_type) {
            return;
        }
        let Some(et) = eth_type_offset(self.bytes()) else {
            return;
        };
        if self.len() < et + 2 {
            return;
        }
        self.grow_front(4);
        let b = self.bytes_mut();
        b.copy_within(4..4 + et + 2, 0);
        b[et..et + 2].copy_from_slice(&eth_type.to_be_bytes());
        b[et + 2..et + 6].copy_from_slice(&lse.to_be_bytes());
    }

    /// Remove the outermost MPLS entry, restoring `eth_type`.
    pub fn pop_mpls(&mut self, eth_type: u16) {
        let b = self.bytes();
        let Some(et) = eth_type_offset(b) else {
            return;
        };
        match be16(b, et) {
            Some(ty) if is_mpls(ty) => {}
            _ => return,
        }
        if b.len() < et + 6 {
            return;
        }
        self.bytes_mut().copy_within(0..et + 2, 4);
        self.shrink_front(4);
        let b = self.bytes_mut();
        b[et..et + 2].copy_from_slice(&eth_type.to_be_bytes());
    }

    /// Rewrite the outermost MPLS label stack entry in place.
    pub fn set_mpls_lse(&mut self, lse: u32) {
        let b = self.bytes();
        let Some(et) = eth_type_offset(b) else {
            return;
        };
        match be16(b, et) {
            Some(ty) if is_mpls(ty) => {}
            _ => return,
        }
        if b.len() < et + 6 {
            return;
        }
        self.bytes_mut()[et + 2..et + 6].copy_from_slice(&lse.to_be_bytes());
    }

    /// Rewrite the Ethernet addresses.
    pub fn set_eth(&mut self, src: Mac, dst: Mac) {
        if self.len() < 12 {
            return;
        }
        let b = self.bytes_mut();
        b[..6].copy_from_slice(&dst.0);
        b[6..12].copy_from_slice(&src.0);
    }

    fn l3_offset(&self, want: u16) -> Option<usize> {
        let b = self.bytes();
        let et = eth_type_offset(b)?;
        if be16(b, et)? == want {
            Some(et + 2)
        } else {
            None
        }
    }

    /// Rewrite IPv4 addresses, TOS, and TTL, fixing the header checksum and
    /// any TCP/UDP checksum the addresses feed into.
    pub fn set_ipv4(&mut self, src: [u8; 4], dst: [u8; 4], tos: u8, ttl: u8) {
        let Some(l3) = self.l3_offset(ETH_TYPE_IP) else {
            return;
        };
        let b = self.bytes_mut();
        if b.len() < l3 + 20 {
            return;
        }
        let ihl = usize::from(b[l3] & 0x0f) * 4;
        if ihl < 20 || b.len() < l3 + ihl {
            return;
        }
        let l4 = l3 + ihl;
        let proto = b[l3 + 9];
        let frag_later = (be16(b, l3 + 6).unwrap_or(0) & 0x1fff) != 0;

        let old_src = u32::from_be_bytes([b[l3 + 12], b[l3 + 13], b[l3 + 14], b[l3 + 15]]);
        let old_dst = u32::from_be_bytes([b[l3 + 16], b[l3 + 17], b[l3 + 18], b[l3 + 19]]);
        let new_src = u32::from_be_bytes(src);
        let new_dst = u32::from_be_bytes(dst);

        // Pseudo-header checksum update for the transport layer.
        if !frag_later {
            let csum_off = match proto {
                6 if b.len() >= l4 + 18 => Some(l4 + 16),
                17 if b.len() >= l4 + 8 && be16(b, l4 + 6) != Some(0) => Some(l4 + 6),
                _ => None,
            };
            if let Some(off) = csum_off {
                let mut csum = u16::from_be_bytes([b[off], b[off + 1]]);
                csum = checksum::recalc32(csum, old_src, new_src);
                csum = checksum::recalc32(csum, old_dst, new_dst);
                b[off..off + 2].copy_from_slice(&csum.to_be_bytes());
            }
        }

        b[l3 + 1] = tos;
        b[l3 + 8] = ttl;
        b[l3 + 12..l3 + 16].copy_from_slice(&src);
        b[l3 + 16..l3 + 20].copy_from_slice(&dst);
        checksum::set_ipv4_header_checksum(&mut b[l3..l3 + ihl]);
    }

    /// Rewrite IPv6 addresses, traffic class, flow label, and hop limit.
    ///
    /// `proto` names the transport protocol whose checksum covers the
    /// addresses; the next-header chain itself is left alone.
    pub fn set_ipv6(
        &mut self,
        proto: u8,
        src: [u8; 16],
        dst: [u8; 16],
        tclass: u8,
        label: u32,
        hlimit: u8,
    ) {
        let Some(l3) = self.l3_offset(ETH_TYPE_IPV6) else {
            return;
        };
        let b = self.bytes_mut();
        if b.len() < l3 + 40 {
            return;
        }

        // Checksum update only reaches the simple no-extension layout.
        if b[l3 + 6] == proto {
            let l4 = l3 + 40;
            let csum_off = match proto {
                6 if b.len() >= l4 + 18 => Some(l4 + 16),
                17 if b.len() >= l4 + 8 && be16(b, l4 + 6) != Some(0) => Some(l4 + 6),
                _ => None,
            };
            if let Some(off) = csum_off {
                let mut csum = u16::from_be_bytes([b[off], b[off + 1]]);
                csum = checksum::recalc_slice(csum, &b[l3 + 8..l3 + 24], &src);
                csum = checksum::recalc_slice(csum, &b[l3 + 24..l3 + 40], &dst);
                b[off..off + 2].copy_from_slice(&csum.to_be_bytes());
            }
        }

        let word0 = (6u32 << 28) | (u32::from(tclass) << 20) | (label & 0x000f_ffff);
        b[l3..l3 + 4].copy_from_slice(&word0.to_be_bytes());
        b[l3 + 7] = hlimit;
        b[l3 + 8..l3 + 24].copy_from_slice(&src);
        b[l3 + 24..l3 + 40].copy_from_slice(&dst);
    }

    fn l4_offset(&self, proto: u8) -> Option<usize> {
        let b = self.bytes();
        if let Some(l3) = self.l3_offset(ETH_TYPE_IP) {
            if b.len() < l3 + 20 {
                return None;
            }
            let ihl = usize::from(b[l3] & 0x0f) * 4;
            if ihl < 20 || b[l3 + 9] != proto || (be16(b, l3 + 6)? & 0x1fff) != 0 {
                return None;
            }
            return Some(l3 + ihl);
        }
        if let Some(l3) = self.l3_offset(ETH_TYPE_IPV6) {
            if b.len() < l3 + 40 || b[l3 + 6] != proto {
                return None;
            }
            return Some(l3 + 40);
        }
        None
    }

    /// Rewrite TCP source and destination ports, updating the checksum.
    pub fn set_tcp_ports(&mut self, src: u16, dst: u16) {
        let Some(l4) = self.l4_offset(6) else {
            return;
        };
        let b = self.bytes_mut();
        if b.len() < l4 + 18 {
            return;
        }
        let mut csum = u16::from_be_bytes([b[l4 + 16], b[l4 + 17]]);
        csum = checksum::recalc16(csum, be16(b, l4).unwrap_or(0), src);
        csum = checksum::recalc16(csum, be16(b, l4 + 2).unwrap_or(0), dst);
        b[l4..l4 + 2].copy_from_slice(&src.to_be_bytes());
        b[l4 + 2..l4 + 4].copy_from_slice(&dst.to_be_bytes());
        b[l4 + 16..l4 + 18].copy_from_slice(&csum.to_be_bytes());
    }

    /// Rewrite UDP ports; a zero (absent) checksum stays zero.
    pub fn set_udp_ports(&mut self, src: u16, dst: u16) {
        let Some(l4) = self.l4_offset(17) else {
            return;
        };
        let b = self.bytes_mut();
        if b.len() < l4 + 8 {
            return;
        }
        let old_csum = be16(b, l4 + 6).unwrap_or(0);
        if old_csum != 0 {
            let mut csum = old_csum;
            csum = checksum::recalc16(csum, be16(b, l4).unwrap_or(0), src);
            csum = checksum::recalc16(csum, be16(b, l4 + 2).unwrap_or(0), dst);
            b[l4 + 6..l4 + 8].copy_from_slice(&csum.to_be_bytes());
        }
        b[l4..l4 + 2].copy_from_slice(&src.to_be_bytes());
        b[l4 + 2..l4 + 4].copy_from_slice(&dst.to_be_bytes());
    }
}

/// TCP flag byte of a frame, or zero when it is not an unfragmented TCP
/// packet. Read from the packet rather than the key so rewrites by earlier
/// actions are observed.
#[must_use]
pub fn tcp_flags(frame: &[u8]) -> u8 {
    let Some(et) = eth_type_offset(frame) else {
        return 0;
    };
    let Some(ty) = be16(frame, et) else {
        return 0;
    };
    let l4 = match ty {
        ETH_TYPE_IP => {
            let l3 = et + 2;
            if frame.len() < l3 + 20 {
                return 0;
            }
            let ihl = usize::from(frame[l3] & 0x0f) * 4;
            if ihl < 20
                || frame[l3 + 9] != 6
                || (be16(frame, l3 + 6).unwrap_or(0) & 0x1fff) != 0
            {
                return 0;
            }
            l3 + ihl
        }
        ETH_TYPE_IPV6 => {
            let l3 = et + 2;
            if frame.len() < l3 + 40 || frame[l3 + 6] != 6 {
                return 0;
            }
            l3 + 40
        }
        _ => return 0,
    };
    if frame.len() < l4 + 14 {
        return 0;
    }
    frame[l4 + 13]
}

/// Frame builders shared by the unit tests and the end-to-end scenarios.
pub mod test_utils {
    use crate::checksum;

    pub const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    pub const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

    /// An Ethernet II frame around an arbitrary payload.
    #[must_use]
    pub fn eth_frame(eth_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut f = Vec::with_capacity(14 + payload.len());
        f.extend_from_slice(&DST_MAC);
        f.extend_from_slice(&SRC_MAC);
        f.extend_from_slice(&eth_type.to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    fn parse_v4(addr: &str) -> [u8; 4] {
        addr.parse::<std::net::Ipv4Addr>().unwrap().octets()
    }

    /// An IPv4 frame with a correct header checksum.
    #[must_use]
    pub fn ipv4_frame(src: &str, dst: &str, proto: u8, l4: &[u8]) -> Vec<u8> {
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        let total = 20 + l4.len();
        ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = proto;
        ip[12..16].copy_from_slice(&parse_v4(src));
        ip[16..20].copy_from_slice(&parse_v4(dst));
        checksum::set_ipv4_header_checksum(&mut ip);
        ip.extend_from_slice(l4);
        eth_frame(super::ETH_TYPE_IP, &ip)
    }

    /// A UDP-in-IPv4 frame with four bytes of payload and a valid checksum.
    #[must_use]
    pub fn udp_frame(src: &str, dst: &str, sport: u16, dport: u16) -> Vec<u8> {
        let data = [0xab_u8; 4];
        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&sport.to_be_bytes());
        udp[2..4].copy_from_slice(&dport.to_be_bytes());
        udp[4..6].copy_from_slice(&(8u16 + 4).to_be_bytes());
        udp.extend_from_slice(&data);
        write_l4_checksum(&mut udp, src, dst, 17, 6);
        ipv4_frame(src, dst, 17, &udp)
    }

    /// A TCP-in-IPv4 frame with the given flag byte and a valid checksum.
    #[must_use]
    pub fn tcp_frame(src: &str, dst: &str, sport: u16, dport: u16, flags: u8) -> Vec<u8> {
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&sport.to_be_bytes());
        tcp[2..4].copy_from_slice(&dport.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = flags;
        tcp[14..16].copy_from_slice(&0x1000_u16.to_be_bytes());
        write_l4_checksum(&mut tcp, src, dst, 6, 16);
        ipv4_frame(src, dst, 6, &tcp)
    }

    /// An ICMP echo request padded out to `frame_len` total bytes.
    #[must_use]
    pub fn icmp_frame(src: &str, dst: &str, frame_len: usize) -> Vec<u8> {
        assert!(frame_len >= 14 + 20 + 8);
        let mut icmp = vec![0u8; frame_len - 14 - 20];
        icmp[0] = 8;
        let csum = !checksum::fold(checksum::sum_bytes(0, &icmp));
        icmp[2..4].copy_from_slice(&csum.to_be_bytes());
        ipv4_frame(src, dst, 1, &icmp)
    }

    /// Insert an 802.1Q tag into an untagged frame.
    #[must_use]
    pub fn vlan_frame(untagged: &[u8], tci: u16) -> Vec<u8> {
        let mut f = untagged[..12].to_vec();
        f.extend_from_slice(&super::ETH_TYPE_VLAN.to_be_bytes());
        f.extend_from_slice(&tci.to_be_bytes());
        f.extend_from_slice(&untagged[12..]);
        f
    }

    fn write_l4_checksum(l4: &mut [u8], src: &str, dst: &str, proto: u8, csum_off: usize) {
        l4[csum_off] = 0;
        l4[csum_off + 1] = 0;
        let mut sum = 0u32;
        sum = checksum::sum_bytes(sum, &parse_v4(src));
        sum = checksum::sum_bytes(sum, &parse_v4(dst));
        sum += u32::from(proto);
        sum += l4.len() as u32;
        sum = checksum::sum_bytes(sum, l4);
        let csum = !checksum::fold(sum);
        l4[csum_off..csum_off + 2].copy_from_slice(&csum.to_be_bytes());
    }
}

#[cfg(test)]
mod test {
    use super::test_utils::{tcp_frame, udp_frame, vlan_frame};
    use super::*;
    use crate::checksum::{fold, sum_bytes};

    fn verify_ipv4_csum(frame: &[u8]) {
        let ihl = usize::from(frame[14] & 0x0f) * 4;
        assert_eq!(fold(sum_bytes(0, &frame[14..14 + ihl])), 0xffff);
    }

    fn verify_l4_csum(frame: &[u8]) {
        let ihl = usize::from(frame[14] & 0x0f) * 4;
        let l3 = &frame[14..];
        let total = usize::from(u16::from_be_bytes([l3[2], l3[3]]));
        let l4 = &l3[ihl..total];
        let mut sum = 0u32;
        sum = sum_bytes(sum, &l3[12..20]);
        sum += u32::from(l3[9]);
        sum += l4.len() as u32;
        assert_eq!(fold(sum_bytes(sum, l4)), 0xffff);
    }

    #[test]
    fn push_then_pop_vlan_restores_frame() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 10, 20);
        let mut pkt = PacketBuf::from_frame(&frame);
        pkt.push_vlan(0x1064);

        let b = pkt.bytes();
        assert_eq!(b.len(), frame.len() + 4);
        assert_eq!(&b[..12], &frame[..12]);
        assert_eq!(u16::from_be_bytes([b[12], b[13]]), ETH_TYPE_VLAN);
        assert_eq!(u16::from_be_bytes([b[14], b[15]]), 0x1064);
        assert_eq!(&b[16..], &frame[12..]);

        pkt.pop_vlan();
        assert_eq!(pkt.bytes(), &frame[..]);
    }

    #[test]
    fn pop_vlan_on_untagged_is_noop() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 10, 20);
        let mut pkt = PacketBuf::from_frame(&frame);
        pkt.pop_vlan();
        assert_eq!(pkt.bytes(), &frame[..]);
    }

    #[test]
    fn repeated_push_exhausts_headroom_gracefully() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        let mut pkt = PacketBuf::from_frame(&frame);
        for _ in 0..4 {
            pkt.push_vlan(5);
        }
        assert_eq!(pkt.len(), frame.len() + 16);
        for _ in 0..4 {
            pkt.pop_vlan();
        }
        assert_eq!(pkt.bytes(), &frame[..]);
    }

    #[test]
    fn mpls_push_set_pop() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        let mut pkt = PacketBuf::from_frame(&frame);

        pkt.push_mpls(ETH_TYPE_MPLS, 0x0001_4140);
        let b = pkt.bytes();
        assert_eq!(u16::from_be_bytes([b[12], b[13]]), ETH_TYPE_MPLS);
        assert_eq!(&b[14..18], &0x0001_4140_u32.to_be_bytes());

        pkt.set_mpls_lse(0x0002_8140);
        assert_eq!(&pkt.bytes()[14..18], &0x0002_8140_u32.to_be_bytes());

        pkt.pop_mpls(ETH_TYPE_IP);
        assert_eq!(pkt.bytes(), &frame[..]);
    }

    #[test]
    fn push_mpls_with_non_mpls_ethertype_is_noop() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        let mut pkt = PacketBuf::from_frame(&frame);
        pkt.push_mpls(ETH_TYPE_IP, 7);
        assert_eq!(pkt.bytes(), &frame[..]);
    }

    #[test]
    fn set_ipv4_rewrites_and_keeps_checksums_valid() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 10, 20);
        let mut pkt = PacketBuf::from_frame(&frame);
        pkt.set_ipv4([192, 168, 1, 1], [192, 168, 1, 2], 0x10, 9);

        let b = pkt.bytes();
        assert_eq!(&b[26..30], &[192, 168, 1, 1]);
        assert_eq!(&b[30..34], &[192, 168, 1, 2]);
        assert_eq!(b[15], 0x10);
        assert_eq!(b[22], 9);
        verify_ipv4_csum(b);
        verify_l4_csum(b);
    }

    #[test]
    fn set_tcp_ports_keeps_checksum_valid() {
        let frame = tcp_frame("10.0.0.1", "10.0.0.2", 1000, 2000, 0x12);
        let mut pkt = PacketBuf::from_frame(&frame);
        pkt.set_tcp_ports(4000, 5000);

        let b = pkt.bytes();
        assert_eq!(u16::from_be_bytes([b[34], b[35]]), 4000);
        assert_eq!(u16::from_be_bytes([b[36], b[37]]), 5000);
        verify_l4_csum(b);
    }

    #[test]
    fn set_udp_ports_keeps_checksum_valid() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 10, 20);
        let mut pkt = PacketBuf::from_frame(&frame);
        pkt.set_udp_ports(53, 5353);

        let b = pkt.bytes();
        assert_eq!(u16::from_be_bytes([b[34], b[35]]), 53);
        assert_eq!(u16::from_be_bytes([b[36], b[37]]), 5353);
        verify_l4_csum(b);
    }

    #[test]
    fn set_on_wrong_protocol_is_noop() {
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 10, 20);
        let mut pkt = PacketBuf::from_frame(&frame);
        pkt.set_tcp_ports(1, 2);
        assert_eq!(pkt.bytes(), &frame[..]);
    }

    #[test]
    fn tcp_flags_reads_the_flag_byte() {
        let frame = tcp_frame("10.0.0.1", "10.0.0.2", 1, 2, 0x18);
        assert_eq!(tcp_flags(&frame), 0x18);
        assert_eq!(tcp_flags(&vlan_frame(&frame, 7)), 0x18);

        let udp = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        assert_eq!(tcp_flags(&udp), 0);
    }
}
