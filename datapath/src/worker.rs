// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The process-wide ingress worker for threaded mode.
//!
//! One thread polls the union of every port's descriptor across every
//! datapath in the registry. The fd list is rebuilt from scratch each pass
//! under the port-table locks; ports added or removed between passes are
//! picked up on the next one. Fatal signals are masked here so only the
//! main thread catches them; shutdown arrives as a byte on a control pipe.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{SigSet, Signal};
use tracing::{debug, error, trace};

use crate::dp::Datapath;
use crate::port::{PortNo, SharedNetdev};
use crate::provider::RegistryInner;
use crate::ratelimit::RateLimit;
use crate::{DpError, DISPATCH_BATCH, WORKER_POLL_TIMEOUT_MS};

static DISPATCH_ERR_RL: RateLimit = RateLimit::new(1, 5);

pub(crate) struct Worker {
    shutdown_wr: File,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Signal the thread and join it.
    pub(crate) fn stop(self) {
        let _ = (&self.shutdown_wr).write(&[1u8]);
        if self.handle.join().is_err() {
            error!("ingress worker panicked");
        }
    }
}

pub(crate) fn spawn(inner: Arc<RegistryInner>) -> Result<Worker, DpError> {
    let (shutdown_rd, shutdown_wr) = nix::unistd::pipe2(OFlag::O_NONBLOCK)?;
    let shutdown_rd = File::from(shutdown_rd);
    let handle = std::thread::Builder::new()
        .name("dp-ingress".to_string())
        .spawn(move || body(&inner, &shutdown_rd))?;
    Ok(Worker {
        shutdown_wr: File::from(shutdown_wr),
        handle,
    })
}

/// Mask the fatal signals so the main thread handles them.
fn mask_signals() {
    let mut set = SigSet::empty();
    for sig in [
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGHUP,
        Signal::SIGALRM,
    ] {
        set.add(sig);
    }
    if let Err(e) = set.thread_block() {
        error!("error setting worker thread sigmask: {e}");
    }
}

type Target = (Arc<Datapath>, PortNo, SharedNetdev, RawFd);

fn collect_targets(inner: &RegistryInner) -> Vec<Target> {
    let dps: Vec<Arc<Datapath>> = inner.datapaths.lock().unwrap().values().cloned().collect();
    let mut targets = Vec::new();
    for dp in &dps {
        let ports = dp.ports.lock().unwrap();
        for p in ports.iter() {
            if let Some(fd) = p.rx_fd {
                targets.push((Arc::clone(dp), p.port_no, p.netdev.clone(), fd));
            }
        }
    }
    targets
}

fn body(inner: &RegistryInner, shutdown: &File) {
    mask_signals();
    debug!("ingress worker running");

    loop {
        let targets = collect_targets(inner);

        let ready: Option<Vec<bool>> = {
            let mut pfds = Vec::with_capacity(targets.len() + 1);
            pfds.push(PollFd::new(shutdown.as_fd(), PollFlags::POLLIN));
            for (_, _, _, fd) in &targets {
                // SAFETY: the netdev holding this fd is kept alive by the
                // Arc in `targets` for the duration of the poll.
                #[allow(unsafe_code)]
                pfds.push(PollFd::new(
                    unsafe { BorrowedFd::borrow_raw(*fd) },
                    PollFlags::POLLIN,
                ));
            }
            match nix::poll::poll(&mut pfds, PollTimeout::from(WORKER_POLL_TIMEOUT_MS)) {
                Ok(n) => {
                    trace!("ingress worker poll wakeup, {n} ready");
                    Some(
                        pfds.iter()
                            .map(|p| p.revents().is_some_and(|r| !r.is_empty()))
                            .collect(),
                    )
                }
                Err(e) if e == nix::errno::Errno::EINTR => None,
                Err(e) => {
                    error!("ingress worker poll failed: {e}");
                    return;
                }
            }
        };
        let Some(ready) = ready else { continue };

        if ready[0] {
            debug!("ingress worker shutting down");
            return;
        }

        for (i, (dp, port_no, nd, _)) in targets.iter().enumerate() {
            if !ready[i + 1] {
                continue;
            }
            // Drain the device first, then classify, so an OUTPUT back to
            // the receiving port never runs under the device lock.
            let mut frames: Vec<Vec<u8>> = Vec::new();
            let result = nd
                .lock()
                .unwrap()
                .dispatch(DISPATCH_BATCH, &mut |frame| frames.push(frame.to_vec()));
            for frame in &frames {
                dp.port_input(*port_no, frame);
            }
            match result {
                Ok(_) | Err(netdev::NetdevError::WouldBlock) => {}
                Err(e) => {
                    if DISPATCH_ERR_RL.admit() {
                        error!("error receiving data from port {port_no}: {e}");
                    }
                }
            }
        }
    }
}
