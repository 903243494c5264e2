// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory backend for the dummy datapath class.
//!
//! A dummy device is a pair of queues: frames a test injects with
//! [`DummyState::inject`] come back out of [`Netdev::recv`], and frames the
//! datapath transmits pile up where [`DummyState::sent`] can see them. A
//! non-blocking pipe mirrors the receive queue so the device still has a
//! pollable descriptor in threaded mode.
//!
//! States are shared by name for the lifetime of the device, so a test can
//! [`attach`] before or after the port exists and observe the same queues.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, LazyLock, Mutex};

use nix::fcntl::OFlag;
use tracing::warn;

use crate::{Netdev, NetdevError};

static DEVICES: LazyLock<Mutex<HashMap<String, Arc<DummyState>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Shared queues of one dummy device.
#[derive(Debug)]
pub struct DummyState {
    rx: Mutex<VecDeque<Vec<u8>>>,
    tx: Mutex<Vec<Vec<u8>>>,
    signal_rd: File,
    signal_wr: File,
}

impl DummyState {
    fn new() -> Arc<Self> {
        let (signal_rd, signal_wr) =
            nix::unistd::pipe2(OFlag::O_NONBLOCK).expect("dummy device pipe");
        Arc::new(DummyState {
            rx: Mutex::new(VecDeque::new()),
            tx: Mutex::new(Vec::new()),
            signal_rd: File::from(signal_rd),
            signal_wr: File::from(signal_wr),
        })
    }

    /// Queue a frame for the datapath to receive on this device.
    pub fn inject(&self, frame: &[u8]) {
        self.rx.lock().unwrap().push_back(frame.to_vec());
        if let Err(e) = (&self.signal_wr).write(&[0u8]) {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                warn!("dummy device signal write failed: {e}");
            }
        }
    }

    /// Frames the datapath has transmitted on this device so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.tx.lock().unwrap().clone()
    }

    fn pop(&self) -> Option<Vec<u8>> {
        let frame = self.rx.lock().unwrap().pop_front();
        if frame.is_some() {
            let mut byte = [0u8; 1];
            let _ = (&self.signal_rd).read(&mut byte);
        }
        frame
    }
}

/// Get (creating if necessary) the shared state of the named dummy device.
#[must_use]
pub fn attach(name: &str) -> Arc<DummyState> {
    DEVICES
        .lock()
        .unwrap()
        .entry(name.to_string())
        .or_insert_with(DummyState::new)
        .clone()
}

pub(crate) struct DummyNetdev {
    name: String,
    state: Arc<DummyState>,
}

impl DummyNetdev {
    pub(crate) fn open(name: &str) -> Self {
        DummyNetdev {
            name: name.to_string(),
            state: attach(name),
        }
    }
}

impl Drop for DummyNetdev {
    fn drop(&mut self) {
        // Forget the name binding; tests holding an Arc keep their queues.
        DEVICES.lock().unwrap().remove(&self.name);
    }
}

impl Netdev for DummyNetdev {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "dummy"
    }

    fn listen(&mut self) -> Result<(), NetdevError> {
        Err(NetdevError::Unsupported)
    }

    fn set_promisc(&mut self) -> Result<(), NetdevError> {
        Ok(())
    }

    fn mtu(&self) -> Result<usize, NetdevError> {
        Ok(1500)
    }

    fn recv_fd(&self) -> Option<RawFd> {
        Some(self.state.signal_rd.as_raw_fd())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetdevError> {
        match self.state.pop() {
            Some(frame) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            None => Err(NetdevError::WouldBlock),
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), NetdevError> {
        self.state.tx.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inject_then_recv() {
        let state = attach("dummy-rt0");
        let mut dev = DummyNetdev::open("dummy-rt0");
        state.inject(&[1, 2, 3, 4]);

        let mut buf = [0u8; 64];
        assert_eq!(dev.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert!(matches!(dev.recv(&mut buf), Err(NetdevError::WouldBlock)));
    }

    #[test]
    fn sent_frames_are_observable() {
        let state = attach("dummy-rt1");
        let mut dev = DummyNetdev::open("dummy-rt1");
        dev.send(&[9, 9, 9]).unwrap();
        assert_eq!(state.sent(), vec![vec![9, 9, 9]]);
    }

    #[test]
    fn listen_is_unsupported() {
        let mut dev = DummyNetdev::open("dummy-rt2");
        assert!(matches!(dev.listen(), Err(NetdevError::Unsupported)));
    }
}
