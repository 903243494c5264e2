// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network-device abstraction consumed by the datapath.
//!
//! A [`Netdev`] is a single attachable interface: the raw-socket backed
//! [`sys`] backend for real interfaces, the [`tap`] backend for the
//! datapath-local port, and the in-memory [`dummy`] backend used by the dummy
//! datapath class and by tests. The datapath only ever talks to the trait.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

pub mod dummy;
mod sys;
mod tap;

use std::os::fd::RawFd;

/// Largest frame any backend will hand to a receive callback.
pub const MAX_FRAME: usize = 9100;

/// Errors surfaced by device backends.
#[derive(Debug, thiserror::Error)]
pub enum NetdevError {
    /// The requested device type has no backend.
    #[error("unknown device type {0:?}")]
    UnknownType(String),
    /// The backend cannot receive packets (dummy devices).
    #[error("receive not supported on this device")]
    Unsupported,
    /// Nothing to receive right now, or the tx ring is full.
    #[error("operation would block")]
    WouldBlock,
    /// Anything the OS reported.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Errors from the nix syscall wrappers.
    #[error(transparent)]
    Sys(#[from] nix::errno::Errno),
}

/// One attachable network interface.
///
/// `recv` and `dispatch` never block: an empty receive queue is
/// [`NetdevError::WouldBlock`], which callers treat as silence.
pub trait Netdev: Send {
    /// Interface name as given to [`open`].
    fn name(&self) -> &str;

    /// Backend type tag ("system", "tap", "dummy").
    fn kind(&self) -> &str;

    /// Bring up the receive side of the device.
    fn listen(&mut self) -> Result<(), NetdevError>;

    /// Enable promiscuous receive.
    fn set_promisc(&mut self) -> Result<(), NetdevError>;

    /// Device MTU, excluding the Ethernet header.
    fn mtu(&self) -> Result<usize, NetdevError>;

    /// File descriptor that becomes readable when a frame is pending.
    fn recv_fd(&self) -> Option<RawFd>;

    /// Receive a single frame into `buf`, returning its length.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetdevError>;

    /// Transmit one frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), NetdevError>;

    /// Drain up to `batch` pending frames through `cb`, returning how many
    /// were handed over. Used by the threaded ingress loop.
    fn dispatch(
        &mut self,
        batch: usize,
        cb: &mut dyn FnMut(&[u8]),
    ) -> Result<usize, NetdevError> {
        let mut buf = vec![0u8; MAX_FRAME];
        let mut n = 0;
        while n < batch {
            match self.recv(&mut buf) {
                Ok(len) => {
                    cb(&buf[..len]);
                    n += 1;
                }
                Err(NetdevError::WouldBlock) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }
}

/// Open a device of the given type.
pub fn open(name: &str, kind: &str) -> Result<Box<dyn Netdev>, NetdevError> {
    match kind {
        "system" => Ok(Box::new(sys::SysNetdev::open(name)?)),
        "tap" => Ok(Box::new(tap::TapNetdev::open(name)?)),
        "dummy" => Ok(Box::new(dummy::DummyNetdev::open(name))),
        other => Err(NetdevError::UnknownType(other.to_string())),
    }
}

/// MTU as the kernel reports it under sysfs. Backends that own a real
/// interface share this; callers fall back to 1500 on error.
pub(crate) fn sysfs_mtu(name: &str) -> Result<usize, NetdevError> {
    let raw = std::fs::read_to_string(format!("/sys/class/net/{name}/mtu"))?;
    raw.trim()
        .parse::<usize>()
        .map_err(|e| NetdevError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
