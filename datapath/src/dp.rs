// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The datapath object: ports, flow table, upcall queues, and the fast path
//! that ties them together.
//!
//! Two mutexes guard a datapath. `ports` covers the slot table; `flows`
//! covers the flow table, both upcall rings, and the hit/miss/lost counters,
//! so a classification result and its counter update are one critical
//! section. When both are needed, `ports` is taken first. The port-change
//! serial is written under the `ports` lock and read without it; a reader
//! may observe a stale equality once and recovers on its next poll.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nix::fcntl::OFlag;
use tracing::{debug, error};

use crate::actions::{attr as act, sample_attr, userspace_attr, ActionList};
use crate::key::{self, FlowKey, Mac};
use crate::packet::{self, PacketBuf};
use crate::poll::PollSet;
use crate::port::{Port, PortNo, PortTable, SharedNetdev};
use crate::provider::{FlowDumpEntry, FlowPutFlags, Provider};
use crate::queue::{Upcall, UpcallKind, UpcallQueue};
use crate::ratelimit::RateLimit;
use crate::table::{FlowStats, FlowTable};
use crate::wire::attrs;
use crate::{time_msec, DpError, DpMode, ETH_HEADER_LEN, MAX_PORTS, N_QUEUES};

static INGRESS_ERR_RL: RateLimit = RateLimit::new(1, 5);

/// Cumulative counters of one datapath.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DpStats {
    /// Entries currently in the flow table.
    pub n_flows: u64,
    /// Packets that matched a flow.
    pub n_hit: u64,
    /// Packets that missed the flow table.
    pub n_missed: u64,
    /// Misses (and queue-bound packets) dropped on ring overflow.
    pub n_lost: u64,
}

/// Everything guarded by the flow-table mutex.
pub(crate) struct FlowPath {
    pub(crate) table: FlowTable,
    pub(crate) queues: [UpcallQueue; N_QUEUES],
    pub(crate) n_hit: u64,
    pub(crate) n_missed: u64,
    pub(crate) n_lost: u64,
}

pub(crate) struct Datapath {
    name: String,
    class: Provider,
    pub(crate) open_cnt: AtomicUsize,
    pub(crate) destroyed: AtomicBool,
    serial: AtomicU64,
    max_mtu: AtomicUsize,
    pub(crate) ports: Mutex<PortTable>,
    pub(crate) flows: Mutex<FlowPath>,
    /// Threaded mode only: a byte per queued upcall, so clients can poll.
    upcall_pipe: Option<(File, File)>,
}

fn mac6(b: &[u8]) -> Mac {
    let mut m = [0u8; 6];
    m.copy_from_slice(&b[..6]);
    Mac(m)
}

impl Datapath {
    pub(crate) fn new(
        name: &str,
        class: Provider,
        mode: DpMode,
    ) -> Result<Arc<Datapath>, DpError> {
        let upcall_pipe = match mode {
            DpMode::Threaded => {
                let (rd, wr) = nix::unistd::pipe2(OFlag::O_NONBLOCK)?;
                Some((File::from(rd), File::from(wr)))
            }
            DpMode::Cooperative => None,
        };
        let dp = Arc::new(Datapath {
            name: name.to_string(),
            class,
            open_cnt: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            serial: AtomicU64::new(0),
            max_mtu: AtomicUsize::new(0),
            ports: Mutex::new(PortTable::new()),
            flows: Mutex::new(FlowPath {
                table: FlowTable::new(),
                queues: std::array::from_fn(|_| UpcallQueue::new()),
                n_hit: 0,
                n_missed: 0,
                n_lost: 0,
            }),
            upcall_pipe,
        });
        // Every datapath is born with its local port in slot 0.
        dp.add_port(name, "internal", Some(0))?;
        Ok(dp)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn class(&self) -> &Provider {
        &self.class
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial.load(Ordering::Relaxed)
    }

    // Port management ------------------------------------------------------

    pub(crate) fn add_port(
        &self,
        devname: &str,
        kind: &str,
        want: Option<u16>,
    ) -> Result<PortNo, DpError> {
        let mut ports = self.ports.lock().unwrap();
        if ports.by_name(devname).is_some() {
            return Err(DpError::Exists);
        }
        let slot = match want {
            Some(n) => {
                if usize::from(n) >= MAX_PORTS {
                    return Err(DpError::TooBig);
                }
                if !ports.is_free(n) {
                    return Err(DpError::Busy);
                }
                n
            }
            None => ports
                .choose(devname, self.class.is_dummy())
                .ok_or(DpError::TooBig)?,
        };

        let open_kind = if kind == "internal" {
            if self.class.is_dummy() {
                "dummy"
            } else {
                "tap"
            }
        } else {
            kind
        };
        let mut nd = netdev::open(devname, open_kind)?;
        if let Err(e) = nd.listen() {
            // Dummy devices cannot listen; tolerated for the dummy class only.
            if !(matches!(e, netdev::NetdevError::Unsupported) && self.class.is_dummy()) {
                error!("{devname}: cannot receive packets on this network device ({e})");
                return Err(e.into());
            }
        }
        nd.set_promisc()?;
        if let Ok(mtu) = nd.mtu() {
            self.max_mtu.fetch_max(mtu, Ordering::Relaxed);
        }

        let rx_fd = nd.recv_fd();
        ports.insert(Port {
            port_no: PortNo(slot),
            name: devname.to_string(),
            kind: kind.to_string(),
            rx_fd,
            netdev: Arc::new(Mutex::new(nd)),
        });
        self.serial.fetch_add(1, Ordering::Relaxed);
        debug!("datapath {}: added port {slot} ({devname})", self.name);
        Ok(PortNo(slot))
    }

    pub(crate) fn del_port(&self, port_no: PortNo) -> Result<(), DpError> {
        let mut ports = self.ports.lock().unwrap();
        let port = ports.remove(port_no).ok_or(DpError::NotFound)?;
        self.serial.fetch_add(1, Ordering::Relaxed);
        debug!("datapath {}: removed port {} ({})", self.name, port_no, port.name);
        Ok(())
    }

    pub(crate) fn port_desc_by_number(&self, port_no: PortNo) -> Result<crate::port::PortDesc, DpError> {
        self.ports
            .lock()
            .unwrap()
            .get(port_no)
            .map(Port::desc)
            .ok_or(DpError::NotFound)
    }

    pub(crate) fn port_desc_by_name(&self, name: &str) -> Result<crate::port::PortDesc, DpError> {
        self.ports
            .lock()
            .unwrap()
            .by_name(name)
            .map(Port::desc)
            .ok_or(DpError::NotFound)
    }

    pub(crate) fn port_dump_next(&self, cursor: u16) -> Option<(crate::port::PortDesc, u16)> {
        self.ports.lock().unwrap().dump_from(cursor)
    }

    // Fast path ------------------------------------------------------------

    /// Classify and process one received frame.
    pub(crate) fn port_input(&self, port_no: PortNo, frame: &[u8]) {
        if frame.len() < ETH_HEADER_LEN {
            return;
        }
        let Some(flow_key) = key::extract(frame, port_no) else {
            return;
        };

        let hit = {
            let mut flows = self.flows.lock().unwrap();
            let fp = &mut *flows;
            if let Some(entry) = fp.table.get_mut(&flow_key) {
                entry.stats.used_ms = time_msec();
                entry.stats.n_packets += 1;
                entry.stats.n_bytes += frame.len() as u64;
                entry.stats.tcp_flags |= packet::tcp_flags(frame);
                fp.n_hit += 1;
                Some(entry.actions.clone())
            } else {
                fp.n_missed += 1;
                self.enqueue_upcall_locked(
                    fp,
                    UpcallKind::Miss,
                    &flow_key,
                    None,
                    PacketBuf::from_frame(frame),
                );
                None
            }
        };

        if let Some(actions) = hit {
            let mut pkt = PacketBuf::from_frame(frame);
            self.execute_actions(&mut pkt, &flow_key, &actions);
        }
    }

    /// Run one non-blocking receive pass over every port (cooperative mode).
    pub(crate) fn run(&self) {
        let snapshot: Vec<(PortNo, String, SharedNetdev)> = {
            self.ports
                .lock()
                .unwrap()
                .iter()
                .map(|p| (p.port_no, p.name.clone(), p.netdev.clone()))
                .collect()
        };
        let mut buf = vec![0u8; netdev::MAX_FRAME];
        for (port_no, name, nd) in snapshot {
            let received = nd.lock().unwrap().recv(&mut buf);
            match received {
                Ok(len) => self.port_input(port_no, &buf[..len]),
                Err(netdev::NetdevError::WouldBlock | netdev::NetdevError::Unsupported) => {}
                Err(e) => {
                    if INGRESS_ERR_RL.admit() {
                        error!("error receiving data from {name}: {e}");
                    }
                }
            }
        }
    }

    /// Register every port's readable fd (cooperative mode).
    pub(crate) fn wait(&self, poll: &mut PollSet) {
        for p in self.ports.lock().unwrap().iter() {
            if let Some(fd) = p.rx_fd {
                poll.add_readable(fd);
            }
        }
    }

    // Actions --------------------------------------------------------------

    pub(crate) fn execute_actions(
        &self,
        pkt: &mut PacketBuf,
        flow_key: &FlowKey,
        actions: &ActionList,
    ) {
        self.execute_action_bytes(pkt, flow_key, actions.bytes());
    }

    fn execute_action_bytes(&self, pkt: &mut PacketBuf, flow_key: &FlowKey, bytes: &[u8]) {
        for a in attrs(bytes) {
            let a = a.expect("validated action stream");
            match a.ty {
                act::OUTPUT => {
                    let port = a.u32().expect("validated action stream");
                    if let Ok(no) = u16::try_from(port) {
                        self.output_port(PortNo(no), pkt);
                    }
                }
                act::USERSPACE => {
                    let userdata = a.nested().find_map(|n| {
                        let n = n.expect("validated action stream");
                        (n.ty == userspace_attr::USERDATA).then(|| n.payload.to_vec())
                    });
                    self.enqueue_upcall(UpcallKind::Action, flow_key, userdata, pkt.clone());
                }
                act::PUSH_VLAN => {
                    pkt.push_vlan(a.be16().expect("validated action stream"));
                }
                act::POP_VLAN => pkt.pop_vlan(),
                act::PUSH_MPLS => {
                    let p = a.expect_len(6).expect("validated action stream");
                    pkt.push_mpls(
                        u16::from_be_bytes([p[0], p[1]]),
                        u32::from_be_bytes([p[2], p[3], p[4], p[5]]),
                    );
                }
                act::POP_MPLS => {
                    pkt.pop_mpls(a.be16().expect("validated action stream"));
                }
                act::SET => self.execute_set(pkt, &a),
                act::SAMPLE => self.execute_sample(pkt, flow_key, &a),
                other => unreachable!("unknown action type {other}"),
            }
        }
    }

    fn execute_set(&self, pkt: &mut PacketBuf, a: &crate::wire::Attr<'_>) {
        let n = a
            .nested()
            .next()
            .expect("validated set action")
            .expect("validated set action");
        let p = n.payload;
        match n.ty {
            key::attr::ETHERNET => pkt.set_eth(mac6(&p[..6]), mac6(&p[6..12])),
            key::attr::IPV4 => pkt.set_ipv4(
                [p[0], p[1], p[2], p[3]],
                [p[4], p[5], p[6], p[7]],
                p[9],
                p[10],
            ),
            key::attr::IPV6 => {
                let mut src = [0u8; 16];
                let mut dst = [0u8; 16];
                src.copy_from_slice(&p[..16]);
                dst.copy_from_slice(&p[16..32]);
                pkt.set_ipv6(
                    p[36],
                    src,
                    dst,
                    p[37],
                    u32::from_be_bytes([p[32], p[33], p[34], p[35]]),
                    p[38],
                );
            }
            key::attr::TCP => pkt.set_tcp_ports(
                u16::from_be_bytes([p[0], p[1]]),
                u16::from_be_bytes([p[2], p[3]]),
            ),
            key::attr::UDP => pkt.set_udp_ports(
                u16::from_be_bytes([p[0], p[1]]),
                u16::from_be_bytes([p[2], p[3]]),
            ),
            key::attr::MPLS => {
                pkt.set_mpls_lse(u32::from_be_bytes([p[0], p[1], p[2], p[3]]));
            }
            // No tunnel, priority, or mark support; accepted and ignored.
            key::attr::TUNNEL | key::attr::PRIORITY | key::attr::MARK => {}
            other => unreachable!("unknown set target {other}"),
        }
    }

    fn execute_sample(&self, pkt: &mut PacketBuf, flow_key: &FlowKey, a: &crate::wire::Attr<'_>) {
        let mut probability = 0u32;
        let mut nested = None;
        for n in a.nested() {
            let n = n.expect("validated sample action");
            match n.ty {
                sample_attr::PROBABILITY => {
                    probability = n.u32().expect("validated sample action");
                }
                sample_attr::ACTIONS => nested = Some(n.payload),
                other => unreachable!("unknown sample attribute {other}"),
            }
        }
        if rand::random::<u32>() >= probability {
            return;
        }
        if let Some(bytes) = nested {
            self.execute_action_bytes(pkt, flow_key, bytes);
        }
    }

    /// Hand the packet to a port's device; a missing port is a silent drop.
    fn output_port(&self, out: PortNo, pkt: &PacketBuf) {
        let nd = self
            .ports
            .lock()
            .unwrap()
            .get(out)
            .map(|p| p.netdev.clone());
        if let Some(nd) = nd {
            if let Err(e) = nd.lock().unwrap().send(pkt.bytes()) {
                debug!("datapath {}: send on port {out} failed: {e}", self.name);
            }
        }
    }

    // Upcalls --------------------------------------------------------------

    fn enqueue_upcall_locked(
        &self,
        fp: &mut FlowPath,
        kind: UpcallKind,
        flow_key: &FlowKey,
        userdata: Option<Vec<u8>>,
        packet: PacketBuf,
    ) {
        let q = &mut fp.queues[kind.queue_index()];
        if q.is_full() {
            fp.n_lost += 1;
            return;
        }
        q.push(Upcall {
            kind,
            key: flow_key.encode(),
            userdata,
            packet,
        });
        // The wake byte goes out with the lock held, so it never precedes
        // the record's visibility.
        if let Some((_, wr)) = &self.upcall_pipe {
            if let Err(e) = (&*wr).write(&[0u8]) {
                if e.kind() != std::io::ErrorKind::WouldBlock {
                    error!("error writing on the upcall pipe: {e}");
                }
            }
        }
    }

    fn enqueue_upcall(
        &self,
        kind: UpcallKind,
        flow_key: &FlowKey,
        userdata: Option<Vec<u8>>,
        packet: PacketBuf,
    ) {
        let mut flows = self.flows.lock().unwrap();
        self.enqueue_upcall_locked(&mut flows, kind, flow_key, userdata, packet);
    }

    /// Oldest queued upcall; the miss ring drains before the action ring.
    pub(crate) fn recv(&self) -> Result<Upcall, DpError> {
        let mut flows = self.flows.lock().unwrap();
        for q in &mut flows.queues {
            if let Some(upcall) = q.pop() {
                if let Some((rd, _)) = &self.upcall_pipe {
                    let mut byte = [0u8; 1];
                    if let Err(e) = (&*rd).read(&mut byte) {
                        if e.kind() != std::io::ErrorKind::WouldBlock {
                            error!("error reading from the upcall pipe: {e}");
                        }
                    }
                }
                return Ok(upcall);
            }
        }
        Err(DpError::WouldBlock)
    }

    pub(crate) fn recv_wait(&self, poll: &mut PollSet) {
        match &self.upcall_pipe {
            Some((rd, _)) => poll.add_readable(rd.as_raw_fd()),
            None => {
                let flows = self.flows.lock().unwrap();
                if flows.queues.iter().any(|q| !q.is_empty()) {
                    poll.immediate_wake();
                }
            }
        }
    }

    pub(crate) fn recv_purge(&self) {
        let mut flows = self.flows.lock().unwrap();
        let mut drained = 0;
        for q in &mut flows.queues {
            drained += q.purge();
        }
        if let Some((rd, _)) = &self.upcall_pipe {
            let mut byte = [0u8; 1];
            for _ in 0..drained {
                if (&*rd).read(&mut byte).is_err() {
                    break;
                }
            }
        }
    }

    // Flows ----------------------------------------------------------------

    pub(crate) fn stats(&self) -> DpStats {
        let flows = self.flows.lock().unwrap();
        DpStats {
            n_flows: flows.table.len() as u64,
            n_hit: flows.n_hit,
            n_missed: flows.n_missed,
            n_lost: flows.n_lost,
        }
    }

    pub(crate) fn flow_get(&self, flow_key: &FlowKey) -> Result<(Vec<u8>, FlowStats), DpError> {
        let flows = self.flows.lock().unwrap();
        let entry = flows.table.get(flow_key).ok_or(DpError::NotFound)?;
        Ok((entry.actions.bytes().to_vec(), entry.stats.clone()))
    }

    /// Install or modify a flow, returning its pre-operation statistics
    /// (zero for a fresh install).
    pub(crate) fn flow_put(
        &self,
        flow_key: FlowKey,
        actions: &[u8],
        flags: FlowPutFlags,
    ) -> Result<FlowStats, DpError> {
        let actions = ActionList::from_bytes(actions)?;
        let mut flows = self.flows.lock().unwrap();
        let fp = &mut *flows;
        if let Some(entry) = fp.table.get_mut(&flow_key) {
            if !flags.modify {
                return Err(DpError::Exists);
            }
            let prev = entry.stats.clone();
            entry.actions = Arc::new(actions);
            if flags.zero_stats {
                entry.stats = FlowStats::default();
            }
            Ok(prev)
        } else {
            if !flags.create {
                return Err(DpError::NotFound);
            }
            fp.table.insert(flow_key, Arc::new(actions))?;
            Ok(FlowStats::default())
        }
    }

    pub(crate) fn flow_del(&self, flow_key: &FlowKey) -> Result<FlowStats, DpError> {
        let mut flows = self.flows.lock().unwrap();
        let entry = flows.table.remove(flow_key).ok_or(DpError::NotFound)?;
        Ok(entry.stats)
    }

    pub(crate) fn flow_flush(&self) {
        self.flows.lock().unwrap().table.clear();
    }

    pub(crate) fn flow_dump_next(
        &self,
        cursor: (u32, u32),
    ) -> Option<(FlowDumpEntry, (u32, u32))> {
        let flows = self.flows.lock().unwrap();
        let (entry, next) = flows.table.at(cursor)?;
        Some((
            FlowDumpEntry {
                key: entry.key.encode(),
                actions: entry.actions.bytes().to_vec(),
                stats: entry.stats.clone(),
            },
            next,
        ))
    }

    /// Run an action program over a caller-supplied packet.
    pub(crate) fn execute(
        &self,
        frame: &[u8],
        flow_key: &FlowKey,
        actions: &[u8],
    ) -> Result<(), DpError> {
        if frame.len() < ETH_HEADER_LEN || frame.len() > usize::from(u16::MAX) {
            return Err(DpError::InvalidArgument);
        }
        let actions = ActionList::from_bytes(actions)?;
        let mut pkt = PacketBuf::from_frame(frame);
        self.execute_actions(&mut pkt, flow_key, &actions);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::actions::ActionsEncoder;
    use crate::packet::test_utils::{icmp_frame, udp_frame};

    fn dummy_dp(name: &str) -> Arc<Datapath> {
        Datapath::new(name, Provider::dummy_like("dummy"), DpMode::Cooperative).unwrap()
    }

    fn put_flow(dp: &Datapath, flow_key: FlowKey, actions: &[u8]) {
        dp.flow_put(
            flow_key,
            actions,
            FlowPutFlags {
                create: true,
                ..FlowPutFlags::default()
            },
        )
        .unwrap();
    }

    #[tracing_test::traced_test]
    #[test]
    fn miss_lands_on_the_miss_queue() {
        let dp = dummy_dp("dp-miss");
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        dp.port_input(PortNo(3), &frame);

        let stats = dp.stats();
        assert_eq!((stats.n_hit, stats.n_missed, stats.n_lost), (0, 1, 0));

        let upcall = dp.recv().unwrap();
        assert_eq!(upcall.kind, UpcallKind::Miss);
        assert_eq!(upcall.packet.bytes(), &frame[..]);
        let decoded = FlowKey::decode(&upcall.key).unwrap();
        assert_eq!(decoded.in_port, PortNo(3));
        assert!(matches!(dp.recv(), Err(DpError::WouldBlock)));
    }

    #[test]
    fn hit_updates_stats_and_outputs() {
        let dp = dummy_dp("dp-hit");
        let out_state = netdev::dummy::attach("dp-hit-out");
        dp.add_port("dp-hit-out", "dummy", Some(7)).unwrap();

        let frame = icmp_frame("10.0.0.1", "10.0.0.2", 98);
        let flow_key = key::extract(&frame, PortNo(2)).unwrap();
        let mut enc = ActionsEncoder::new();
        enc.output(PortNo(7));
        put_flow(&dp, flow_key, &enc.finish());

        dp.port_input(PortNo(2), &frame);

        let stats = dp.stats();
        assert_eq!((stats.n_hit, stats.n_missed), (1, 0));
        let (_, fstats) = dp.flow_get(&flow_key).unwrap();
        assert_eq!(fstats.n_packets, 1);
        assert_eq!(fstats.n_bytes, 98);
        assert_eq!(out_state.sent(), vec![frame]);
    }

    #[test]
    fn userspace_action_queues_with_userdata() {
        let dp = dummy_dp("dp-user");
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        let flow_key = key::extract(&frame, PortNo(1)).unwrap();
        let mut enc = ActionsEncoder::new();
        enc.userspace(Some(&[0xde, 0xad]));
        put_flow(&dp, flow_key, &enc.finish());

        dp.port_input(PortNo(1), &frame);

        let upcall = dp.recv().unwrap();
        assert_eq!(upcall.kind, UpcallKind::Action);
        assert_eq!(upcall.userdata.as_deref(), Some(&[0xde, 0xad][..]));
    }

    #[test]
    fn overflow_counts_lost() {
        let dp = dummy_dp("dp-full");
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        for _ in 0..200 {
            dp.port_input(PortNo(1), &frame);
        }
        let stats = dp.stats();
        assert_eq!(stats.n_missed, 200);
        assert_eq!(stats.n_lost, 200 - u64::from(crate::MAX_QUEUE_LEN));

        let mut received = 0;
        while dp.recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, crate::MAX_QUEUE_LEN);
    }

    #[test]
    fn tcp_flags_accumulate_across_hits() {
        use crate::packet::test_utils::tcp_frame;
        let dp = dummy_dp("dp-flags");
        let syn = tcp_frame("10.0.0.1", "10.0.0.2", 5, 6, 0x02);
        let flow_key = key::extract(&syn, PortNo(1)).unwrap();
        put_flow(&dp, flow_key, &[]);

        dp.port_input(PortNo(1), &syn);
        dp.port_input(PortNo(1), &tcp_frame("10.0.0.1", "10.0.0.2", 5, 6, 0x10));

        let (_, stats) = dp.flow_get(&flow_key).unwrap();
        assert_eq!(stats.tcp_flags, 0x12);
        assert!(stats.used_ms <= crate::time_msec());
    }

    #[test]
    fn sample_probability_extremes() {
        let dp = dummy_dp("dp-sample");
        let out_state = netdev::dummy::attach("dp-sample-out");
        dp.add_port("dp-sample-out", "dummy", Some(9)).unwrap();

        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        let flow_key = key::extract(&frame, PortNo(1)).unwrap();

        let mut inner = ActionsEncoder::new();
        inner.output(PortNo(9));
        let inner = ActionList::from_bytes(&inner.finish()).unwrap();

        // Probability zero never fires.
        let mut never = ActionsEncoder::new();
        never.sample(0, &inner);
        let never = ActionList::from_bytes(&never.finish()).unwrap();
        let mut pkt = PacketBuf::from_frame(&frame);
        dp.execute_actions(&mut pkt, &flow_key, &never);
        assert!(out_state.sent().is_empty());

        // Probability u32::MAX fires (short of a 1 in 2^32 draw).
        let mut always = ActionsEncoder::new();
        always.sample(u32::MAX, &inner);
        let always = ActionList::from_bytes(&always.finish()).unwrap();
        let mut pkt = PacketBuf::from_frame(&frame);
        dp.execute_actions(&mut pkt, &flow_key, &always);
        assert_eq!(out_state.sent().len(), 1);
    }

    #[test]
    fn flow_put_flag_combinations() {
        let dp = dummy_dp("dp-putflags");
        let frame = udp_frame("10.0.0.1", "10.0.0.2", 1, 2);
        let flow_key = key::extract(&frame, PortNo(1)).unwrap();

        // Modify without create on an absent flow.
        let r = dp.flow_put(
            flow_key,
            &[],
            FlowPutFlags {
                modify: true,
                ..FlowPutFlags::default()
            },
        );
        assert!(matches!(r, Err(DpError::NotFound)));

        put_flow(&dp, flow_key, &[]);
        dp.port_input(PortNo(1), &frame);

        // Create on an existing flow.
        let r = dp.flow_put(
            flow_key,
            &[],
            FlowPutFlags {
                create: true,
                ..FlowPutFlags::default()
            },
        );
        assert!(matches!(r, Err(DpError::Exists)));

        // Modify returns prior stats and can zero them.
        let mut enc = ActionsEncoder::new();
        enc.pop_vlan();
        let prev = dp
            .flow_put(
                flow_key,
                &enc.finish(),
                FlowPutFlags {
                    modify: true,
                    zero_stats: true,
                    ..FlowPutFlags::default()
                },
            )
            .unwrap();
        assert_eq!(prev.n_packets, 1);
        let (actions, stats) = dp.flow_get(&flow_key).unwrap();
        assert_eq!(stats.n_packets, 0);
        assert!(!actions.is_empty());
    }
}
