// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The provider interface: the registry of datapath classes and names, and
//! the per-open handle the bridge layer drives a datapath through.
//!
//! A [`Registry`] owns every datapath in the process (tests create their own
//! registries, so nothing leaks between them). Opening a datapath yields a
//! fresh [`DpHandle`]; any number of handles may share one datapath. A
//! datapath is freed when its last handle drops *and* destroy was requested.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::dp::{Datapath, DpStats};
use crate::key::FlowKey;
use crate::poll::PollSet;
use crate::port::{PortDesc, PortNo};
use crate::queue::Upcall;
use crate::ratelimit::RateLimit;
use crate::table::FlowStats;
use crate::worker::{self, Worker};
use crate::{DpError, DpMode, MAX_PORTS};

static KEY_PARSE_RL: RateLimit = RateLimit::new(1, 5);

/// A datapath class descriptor. The dummy provider is this implementation
/// under a different tag; it exists for testing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Provider {
    kind: String,
    dummy: bool,
}

impl Provider {
    pub(crate) fn netdev() -> Self {
        Provider {
            kind: "netdev".to_string(),
            dummy: false,
        }
    }

    pub(crate) fn dummy_like(kind: &str) -> Self {
        Provider {
            kind: kind.to_string(),
            dummy: true,
        }
    }

    /// The type tag datapaths of this class are opened under.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Dummy classes get dummy-backed local ports, tolerate devices that
    /// cannot listen, and use the predictable port-numbering heuristics.
    #[must_use]
    pub fn is_dummy(&self) -> bool {
        self.dummy
    }
}

/// Flags for [`DpHandle::flow_put`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FlowPutFlags {
    /// Install the flow if the key is absent.
    pub create: bool,
    /// Replace the actions if the key is present.
    pub modify: bool,
    /// Zero the statistics after a modify.
    pub zero_stats: bool,
}

pub(crate) struct RegistryInner {
    pub(crate) mode: DpMode,
    pub(crate) providers: Mutex<BTreeMap<String, Provider>>,
    pub(crate) datapaths: Mutex<BTreeMap<String, Arc<Datapath>>>,
    pub(crate) worker: Mutex<Option<Worker>>,
}

/// Process-wide datapath state: registered providers and named datapaths.
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    /// A cooperative-mode registry with the netdev provider registered.
    #[must_use]
    pub fn new() -> Self {
        Registry::with_mode(DpMode::Cooperative)
    }

    #[must_use]
    pub fn with_mode(mode: DpMode) -> Self {
        let mut providers = BTreeMap::new();
        providers.insert("netdev".to_string(), Provider::netdev());
        Registry {
            inner: Arc::new(RegistryInner {
                mode,
                providers: Mutex::new(providers),
                datapaths: Mutex::new(BTreeMap::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Register the dummy provider. With `override_existing`, every already
    /// registered type is additionally displaced by a dummy-tagged clone.
    pub fn register_dummy(&self, override_existing: bool) {
        let mut providers = self.inner.providers.lock().unwrap();
        if override_existing {
            for (kind, provider) in providers.iter_mut() {
                *provider = Provider::dummy_like(kind);
            }
        }
        providers.insert("dummy".to_string(), Provider::dummy_like("dummy"));
    }

    /// Registered provider type tags.
    #[must_use]
    pub fn provider_kinds(&self) -> Vec<String> {
        self.inner.providers.lock().unwrap().keys().cloned().collect()
    }

    /// Names of the datapaths of one class.
    #[must_use]
    pub fn enumerate(&self, kind: &str) -> Vec<String> {
        self.inner
            .datapaths
            .lock()
            .unwrap()
            .values()
            .filter(|dp| dp.class().kind() == kind)
            .map(|dp| dp.name().to_string())
            .collect()
    }

    /// Open a datapath by class and name.
    pub fn open(&self, kind: &str, name: &str, create: bool) -> Result<DpHandle, DpError> {
        let class = self
            .inner
            .providers
            .lock()
            .unwrap()
            .get(kind)
            .cloned()
            .ok_or(DpError::Unsupported)?;

        let dp = {
            let mut dps = self.inner.datapaths.lock().unwrap();
            match dps.get(name) {
                None => {
                    if !create {
                        return Err(DpError::NotFound);
                    }
                    let dp = Datapath::new(name, class, self.inner.mode)?;
                    dps.insert(name.to_string(), Arc::clone(&dp));
                    debug!("created datapath {name} ({kind})");
                    dp
                }
                Some(dp) => {
                    if *dp.class() != class {
                        return Err(DpError::InvalidArgument);
                    }
                    if create {
                        return Err(DpError::Exists);
                    }
                    Arc::clone(dp)
                }
            }
        };

        dp.open_cnt.fetch_add(1, Ordering::AcqRel);
        if self.inner.mode == DpMode::Threaded {
            self.ensure_worker()?;
        }
        let serial = dp.serial();
        Ok(DpHandle {
            inner: Arc::clone(&self.inner),
            dp,
            serial,
        })
    }

    fn ensure_worker(&self) -> Result<(), DpError> {
        let mut worker = self.inner.worker.lock().unwrap();
        if worker.is_none() {
            *worker = Some(worker::spawn(Arc::clone(&self.inner))?);
            debug!("datapath ingress worker started");
        }
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Some(worker) = self.inner.worker.lock().unwrap().take() {
            worker.stop();
        }
    }
}

/// One open of a datapath.
pub struct DpHandle {
    inner: Arc<RegistryInner>,
    dp: Arc<Datapath>,
    /// Port-change serial at open or last successful poll.
    serial: u64,
}

impl Drop for DpHandle {
    fn drop(&mut self) {
        let prev = self.dp.open_cnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
        if prev == 1 && self.dp.destroyed.load(Ordering::Acquire) {
            self.inner
                .datapaths
                .lock()
                .unwrap()
                .remove(self.dp.name());
        }
    }
}

/// One page of a flow dump.
#[derive(Clone, Debug)]
pub struct FlowDumpEntry {
    /// Serialized key.
    pub key: Vec<u8>,
    /// Action program bytes.
    pub actions: Vec<u8>,
    pub stats: FlowStats,
}

/// Cursor-based flow iteration; see the flow-table documentation for the
/// consistency contract under concurrent mutation.
pub struct FlowDump {
    dp: Arc<Datapath>,
    cursor: (u32, u32),
}

impl Iterator for FlowDump {
    type Item = FlowDumpEntry;

    fn next(&mut self) -> Option<FlowDumpEntry> {
        let (entry, next) = self.dp.flow_dump_next(self.cursor)?;
        self.cursor = next;
        Some(entry)
    }
}

/// Slot-ordered port iteration.
pub struct PortDump {
    dp: Arc<Datapath>,
    cursor: u16,
}

impl Iterator for PortDump {
    type Item = PortDesc;

    fn next(&mut self) -> Option<PortDesc> {
        let (desc, next) = self.dp.port_dump_next(self.cursor)?;
        self.cursor = next;
        Some(desc)
    }
}

impl DpHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        self.dp.name()
    }

    /// The class this handle was opened under.
    #[must_use]
    pub fn class(&self) -> Provider {
        self.dp.class().clone()
    }

    /// Mark the datapath for deletion once every handle is closed.
    pub fn destroy(&self) {
        self.dp.destroyed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn stats(&self) -> DpStats {
        self.dp.stats()
    }

    // Ports ----------------------------------------------------------------

    /// Attach a device. `port_no` of `None` lets the datapath pick a slot.
    pub fn port_add(
        &self,
        devname: &str,
        kind: &str,
        port_no: Option<u16>,
    ) -> Result<PortNo, DpError> {
        self.dp.add_port(devname, kind, port_no)
    }

    pub fn port_del(&self, port_no: PortNo) -> Result<(), DpError> {
        if port_no == PortNo::LOCAL {
            return Err(DpError::InvalidArgument);
        }
        if usize::from(port_no.0) >= MAX_PORTS {
            return Err(DpError::InvalidArgument);
        }
        self.dp.del_port(port_no)
    }

    pub fn port_query_by_number(&self, port_no: PortNo) -> Result<PortDesc, DpError> {
        if usize::from(port_no.0) >= MAX_PORTS {
            return Err(DpError::InvalidArgument);
        }
        self.dp.port_desc_by_number(port_no)
    }

    pub fn port_query_by_name(&self, name: &str) -> Result<PortDesc, DpError> {
        self.dp.port_desc_by_name(name)
    }

    #[must_use]
    pub fn port_dump(&self) -> PortDump {
        PortDump {
            dp: Arc::clone(&self.dp),
            cursor: 0,
        }
    }

    /// True if ports changed since this handle last polled (or was opened).
    pub fn port_poll(&mut self) -> bool {
        let current = self.dp.serial();
        if current == self.serial {
            false
        } else {
            self.serial = current;
            true
        }
    }

    /// Arrange a wake if a port change is already pending.
    pub fn port_poll_wait(&self, poll: &mut PollSet) {
        if self.dp.serial() != self.serial {
            poll.immediate_wake();
        }
    }

    // Ingress --------------------------------------------------------------

    /// One non-blocking receive pass over every port. No-op in threaded
    /// mode, where the worker owns ingress.
    pub fn run(&self) {
        if self.inner.mode == DpMode::Cooperative {
            self.dp.run();
        }
    }

    /// Register ingress interest with the host poll loop. No-op in threaded
    /// mode.
    pub fn wait(&self, poll: &mut PollSet) {
        if self.inner.mode == DpMode::Cooperative {
            self.dp.wait(poll);
        }
    }

    // Flows ----------------------------------------------------------------

    pub fn flow_get(&self, key: &[u8]) -> Result<(Vec<u8>, FlowStats), DpError> {
        let flow_key = self.key_from_bytes(key)?;
        self.dp.flow_get(&flow_key)
    }

    /// Install or modify a flow. Returns the flow's pre-operation stats
    /// (zero for a fresh install).
    pub fn flow_put(
        &self,
        key: &[u8],
        actions: &[u8],
        flags: FlowPutFlags,
    ) -> Result<FlowStats, DpError> {
        let flow_key = self.key_from_bytes(key)?;
        self.dp.flow_put(flow_key, actions, flags)
    }

    /// Remove a flow, returning its final statistics.
    pub fn flow_del(&self, key: &[u8]) -> Result<FlowStats, DpError> {
        let flow_key = self.key_from_bytes(key)?;
        self.dp.flow_del(&flow_key)
    }

    pub fn flow_flush(&self) {
        self.dp.flow_flush();
    }

    #[must_use]
    pub fn flow_dump(&self) -> FlowDump {
        FlowDump {
            dp: Arc::clone(&self.dp),
            cursor: (0, 0),
        }
    }

    /// Run an action program over a caller-supplied packet, classified under
    /// the caller-supplied key.
    pub fn execute(&self, packet: &[u8], key: &[u8], actions: &[u8]) -> Result<(), DpError> {
        let flow_key = self.key_from_bytes(key)?;
        self.dp.execute(packet, &flow_key, actions)
    }

    // Upcalls --------------------------------------------------------------

    /// Enable or disable upcall reception. Always on here; accepted for
    /// interface compatibility.
    pub fn recv_set(&self, _enable: bool) -> Result<(), DpError> {
        Ok(())
    }

    /// The oldest queued upcall, or [`DpError::WouldBlock`].
    pub fn recv(&self) -> Result<Upcall, DpError> {
        self.dp.recv()
    }

    /// Arrange a wake when an upcall is (or becomes) available.
    pub fn recv_wait(&self, poll: &mut PollSet) {
        self.dp.recv_wait(poll);
    }

    /// Drop every queued upcall.
    pub fn recv_purge(&self) {
        self.dp.recv_purge();
    }

    fn key_from_bytes(&self, bytes: &[u8]) -> Result<FlowKey, DpError> {
        let flow_key = match FlowKey::decode(bytes) {
            Ok(k) => k,
            Err(e) => {
                // The emit and parse directions disagreeing on a key this
                // process produced is a programming error worth shouting
                // about, but not worth flooding the log at packet rate.
                if KEY_PARSE_RL.admit() {
                    error!("internal error parsing flow key: {e}");
                }
                return Err(DpError::InvalidArgument);
            }
        };
        if !flow_key.in_port.valid_in_key() {
            return Err(DpError::InvalidArgument);
        }
        Ok(flow_key)
    }
}
