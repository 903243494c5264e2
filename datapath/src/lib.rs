// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Userspace packet-switching datapath.
//!
//! A process hosts any number of named datapaths, each owning a set of
//! attached ports, an exact-match flow table, and a pair of upcall queues.
//! Frames received on a port are parsed into a [`key::FlowKey`], classified
//! against the flow table, and either run through the flow's action program
//! or queued as an upcall for the controlling client to pick up.
//!
//! The public surface is the [`provider::Registry`] and the per-open
//! [`provider::DpHandle`]; datapaths themselves are never handed out.
//! Ingress runs either cooperatively from the host's poll loop
//! ([`DpMode::Cooperative`]) or on a single process-wide worker thread
//! ([`DpMode::Threaded`]).

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::match_same_arms,
    clippy::doc_markdown
)]

pub mod actions;
mod checksum;
mod dp;
pub mod key;
pub mod packet;
mod poll;
pub mod port;
pub mod provider;
pub mod queue;
mod ratelimit;
mod table;
pub mod wire;
mod worker;

pub use dp::DpStats;
pub use poll::PollSet;
pub use provider::{DpHandle, Registry};
pub use table::FlowStats;

use std::sync::LazyLock;
use std::time::Instant;

/// Maximum number of port slots per datapath; slot 0 is the local port.
pub const MAX_PORTS: usize = 256;

/// Maximum number of entries in a flow table.
pub const MAX_FLOWS: usize = 65_536;

/// Upcall rings per datapath (miss and explicit-userspace).
pub const N_QUEUES: usize = 2;

/// Capacity of each upcall ring.
pub const MAX_QUEUE_LEN: u32 = 128;
const _: () = assert!(MAX_QUEUE_LEN.is_power_of_two());

/// Frames handed over per ready port per worker wakeup.
pub const DISPATCH_BATCH: usize = 50;

/// Worker thread poll timeout.
pub const WORKER_POLL_TIMEOUT_MS: u16 = 2000;

/// Length of an Ethernet header without any tag.
pub const ETH_HEADER_LEN: usize = 14;

/// Length of one 802.1Q tag.
pub const VLAN_HEADER_LEN: usize = 4;

/// Headroom reserved in front of every owned frame: room for one VLAN tag
/// plus two bytes so the IP header stays 4-byte aligned.
pub const HEADROOM: usize = 2 + VLAN_HEADER_LEN;

/// How a registry (and every datapath in it) runs its ingress.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DpMode {
    /// The host drives ingress by calling run/wait from its poll loop.
    Cooperative,
    /// A single worker thread polls every port of every datapath.
    Threaded,
}

/// Errors returned across the provider interface. The variants mirror the
/// errno vocabulary the bridge layer expects.
#[derive(Debug, thiserror::Error)]
pub enum DpError {
    /// No datapath, port, or flow by that identifier.
    #[error("not found")]
    NotFound,
    /// The datapath, port, or flow already exists.
    #[error("already exists")]
    Exists,
    /// A malformed key, unknown port reference, or bad flag combination.
    #[error("invalid argument")]
    InvalidArgument,
    /// A fixed capacity (port slots, flow entries) is exhausted.
    #[error("capacity exceeded")]
    TooBig,
    /// The requested port slot is occupied.
    #[error("resource busy")]
    Busy,
    /// No provider is registered for the requested datapath type.
    #[error("operation not supported")]
    Unsupported,
    /// Nothing ready right now; try again after waiting.
    #[error("resource temporarily unavailable")]
    WouldBlock,
    /// An attribute stream could not be decoded.
    #[error(transparent)]
    Wire(#[from] wire::WireError),
    /// The underlying network device failed.
    #[error(transparent)]
    Netdev(#[from] netdev::NetdevError),
    /// A syscall outside the device layer failed (pipes, polling).
    #[error(transparent)]
    Sys(#[from] nix::errno::Errno),
    /// Thread machinery failed to come up.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Monotonic milliseconds since the first call in this process.
pub(crate) fn time_msec() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}
