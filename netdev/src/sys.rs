// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Raw `AF_PACKET` backend for real kernel interfaces.

use std::io::Write;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

use afpacket::sync::RawPacketStream;
use nix::sys::socket::{self, MsgFlags};
use tracing::{error, warn};

use crate::{Netdev, NetdevError};

/// Socket receive/send buffer size requested for each interface.
const SOCK_BUF_SIZE: usize = 4 * 1024 * 1024;

pub(crate) struct SysNetdev {
    name: String,
    ifindex: libc::c_uint,
    sock: RawPacketStream,
}

impl SysNetdev {
    pub(crate) fn open(name: &str) -> Result<Self, NetdevError> {
        let mut sock = RawPacketStream::new()?;
        sock.set_non_blocking();
        sock.bind(name)
            .inspect_err(|e| error!("failed to open raw sock for interface {name}: {e}"))?;
        let ifindex = nix::net::if_::if_nametoindex(name)?;

        let fd = sock.as_raw_fd();
        // SAFETY: fd is owned by `sock`, which outlives this borrow.
        #[allow(unsafe_code)]
        let bfd = unsafe { BorrowedFd::borrow_raw(fd) };
        socket::setsockopt(&bfd, socket::sockopt::RcvBuf, &SOCK_BUF_SIZE)
            .inspect_err(|e| warn!("failed to set SO_RCVBUF for interface {name}: {e}"))?;
        socket::setsockopt(&bfd, socket::sockopt::SndBuf, &SOCK_BUF_SIZE)
            .inspect_err(|e| warn!("failed to set SO_SNDBUF for interface {name}: {e}"))?;

        Ok(SysNetdev {
            name: name.to_string(),
            ifindex,
            sock,
        })
    }
}

impl Netdev for SysNetdev {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "system"
    }

    fn listen(&mut self) -> Result<(), NetdevError> {
        // The packet socket receives from the moment it is bound.
        Ok(())
    }

    fn set_promisc(&mut self) -> Result<(), NetdevError> {
        // PACKET_ADD_MEMBERSHIP with PACKET_MR_PROMISC is not exposed by the
        // higher-level socket wrappers.
        let mreq = libc::packet_mreq {
            mr_ifindex: self.ifindex as libc::c_int,
            mr_type: libc::PACKET_MR_PROMISC as libc::c_ushort,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        // SAFETY: mreq is a valid packet_mreq for the lifetime of the call.
        #[allow(unsafe_code)]
        let rc = unsafe {
            libc::setsockopt(
                self.sock.as_raw_fd(),
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                std::ptr::addr_of!(mreq).cast(),
                libc::socklen_t::try_from(std::mem::size_of::<libc::packet_mreq>())
                    .unwrap_or(libc::socklen_t::MAX),
            )
        };
        if rc == -1 {
            return Err(NetdevError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn mtu(&self) -> Result<usize, NetdevError> {
        crate::sysfs_mtu(&self.name)
    }

    fn recv_fd(&self) -> Option<RawFd> {
        Some(self.sock.as_raw_fd())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetdevError> {
        match socket::recv(
            self.sock.as_raw_fd(),
            buf,
            MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_TRUNC,
        ) {
            Ok(0) => Err(NetdevError::WouldBlock),
            Ok(len) if len > buf.len() => {
                // MSG_TRUNC reports the untruncated length.
                warn!(
                    "frame of {len} octets on {} truncated to {}",
                    self.name,
                    buf.len()
                );
                Ok(buf.len())
            }
            Ok(len) => Ok(len),
            Err(e) if e == nix::errno::Errno::EWOULDBLOCK => Err(NetdevError::WouldBlock),
            Err(e) => Err(NetdevError::Sys(e)),
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), NetdevError> {
        match self.sock.write(frame) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(NetdevError::WouldBlock),
            Err(e) => Err(NetdevError::Io(e)),
        }
    }
}
