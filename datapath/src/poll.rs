// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The host's poll set for cooperative mode.
//!
//! Wait entry points deposit descriptors (or an immediate wake) here; the
//! host blocks once per loop iteration. The set resets itself on every
//! block, so the loop re-registers interest each pass.

use std::os::fd::{BorrowedFd, RawFd};

use nix::poll::{PollFd, PollFlags, PollTimeout};
use tracing::warn;

#[derive(Debug, Default)]
pub struct PollSet {
    fds: Vec<RawFd>,
    immediate: bool,
}

impl PollSet {
    #[must_use]
    pub fn new() -> Self {
        PollSet::default()
    }

    /// Wake when `fd` becomes readable.
    pub fn add_readable(&mut self, fd: RawFd) {
        self.fds.push(fd);
    }

    /// Do not block at all on the next `block` call.
    pub fn immediate_wake(&mut self) {
        self.immediate = true;
    }

    /// Block until any registered fd is readable, the timeout elapses, or an
    /// immediate wake was requested. Clears the set for the next iteration.
    pub fn block(&mut self, timeout_ms: Option<u16>) {
        if !self.immediate {
            // SAFETY: the fds registered this iteration outlive the call;
            // wait entry points register nothing they are about to close.
            #[allow(unsafe_code)]
            let mut pfds: Vec<PollFd> = self
                .fds
                .iter()
                .map(|fd| {
                    PollFd::new(
                        unsafe { BorrowedFd::borrow_raw(*fd) },
                        PollFlags::POLLIN,
                    )
                })
                .collect();
            let timeout = timeout_ms.map_or(PollTimeout::NONE, PollTimeout::from);
            if let Err(e) = nix::poll::poll(&mut pfds, timeout) {
                if e != nix::errno::Errno::EINTR {
                    warn!("poll failed: {e}");
                }
            }
        }
        self.fds.clear();
        self.immediate = false;
    }
}
