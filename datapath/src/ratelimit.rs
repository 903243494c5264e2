// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Token-bucket guard for hot-path log statements.
//!
//! Receive failures and key-codec disagreements can repeat at packet rate; a
//! small bucket in front of the log line keeps them visible without letting
//! them flood.

use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
pub(crate) struct RateLimit {
    /// Tokens added per second.
    rate: u32,
    /// Bucket capacity.
    burst: u32,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    tokens: u32,
    last: Option<Instant>,
}

impl RateLimit {
    pub(crate) const fn new(rate: u32, burst: u32) -> Self {
        RateLimit {
            rate,
            burst,
            state: Mutex::new(State {
                tokens: burst,
                last: None,
            }),
        }
    }

    /// True if the caller may log now.
    pub(crate) fn admit(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        let now = Instant::now();
        match s.last {
            None => s.last = Some(now),
            Some(last) => {
                let refill = (now - last).as_millis() as u64 * u64::from(self.rate) / 1000;
                if refill > 0 {
                    s.tokens = s
                        .tokens
                        .saturating_add(refill.min(u64::from(self.burst)) as u32)
                        .min(self.burst);
                    s.last = Some(now);
                }
            }
        }
        if s.tokens > 0 {
            s.tokens -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn burst_admits_then_blocks() {
        let rl = RateLimit::new(1, 3);
        assert!(rl.admit());
        assert!(rl.admit());
        assert!(rl.admit());
        assert!(!rl.admit());
    }
}
