// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tap backend for the datapath-local port.
//!
//! The local port is the host's own leg into a datapath: frames output to
//! port 0 surface in the kernel network stack through the tap, and anything
//! the host transmits on the tap interface enters the datapath as ingress.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use crate::{Netdev, NetdevError};

pub(crate) struct TapNetdev {
    name: String,
    file: File,
}

impl TapNetdev {
    pub(crate) fn open(name: &str) -> Result<Self, NetdevError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let name_bytes = name.as_bytes();
        if name_bytes.len() >= ifr.ifr_name.len() {
            return Err(NetdevError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "interface name too long",
            )));
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = *src as libc::c_char;
        }
        ifr.ifr_ifru.ifru_flags = (libc::IFF_TAP | libc::IFF_NO_PI) as libc::c_short;

        // SAFETY: TUNSETIFF reads a properly initialized ifreq.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETIFF, &ifr) };
        if rc == -1 {
            return Err(NetdevError::Io(std::io::Error::last_os_error()));
        }

        Ok(TapNetdev {
            name: name.to_string(),
            file,
        })
    }
}

impl Netdev for TapNetdev {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "tap"
    }

    fn listen(&mut self) -> Result<(), NetdevError> {
        Ok(())
    }

    fn set_promisc(&mut self) -> Result<(), NetdevError> {
        // A tap is a point endpoint; it sees everything written to it.
        Ok(())
    }

    fn mtu(&self) -> Result<usize, NetdevError> {
        crate::sysfs_mtu(&self.name)
    }

    fn recv_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetdevError> {
        match (&self.file).read(buf) {
            Ok(0) => Err(NetdevError::WouldBlock),
            Ok(len) => Ok(len),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(NetdevError::WouldBlock),
            Err(e) => Err(NetdevError::Io(e)),
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), NetdevError> {
        match (&self.file).write(frame) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(NetdevError::WouldBlock),
            Err(e) => Err(NetdevError::Io(e)),
        }
    }
}
