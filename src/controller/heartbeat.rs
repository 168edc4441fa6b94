// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Low-rate keep-alive outputters run by the protocol controllers while
//! connected (spec §4.4).

use std::time::{Duration, Instant};

/// Tracks "is it time to emit another heartbeat frame" independent of what
/// that frame actually is — both `IfsfHeartBeatOutputter` and
/// `TransitHeartBeatOutputter` wrap one of these with their own interval.
struct HeartbeatOutputter {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl HeartbeatOutputter {
    fn new(interval: Duration) -> Self {
        Self { interval, last_sent: None }
    }

    /// Returns `true` (and resets the clock) exactly when a new heartbeat is
    /// due; `connected=false` suppresses heartbeats and clears the clock so
    /// reconnecting always heartbeats promptly.
    fn due(&mut self, connected: bool) -> bool {
        if !connected {
            self.last_sent = None;
            return false;
        }
        let due = self.last_sent.map(|t| t.elapsed() >= self.interval).unwrap_or(true);
        if due {
            self.last_sent = Some(Instant::now());
        }
        due
    }
}

pub struct TransitHeartBeatOutputter {
    inner: HeartbeatOutputter,
}

impl Default for TransitHeartBeatOutputter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitHeartBeatOutputter {
    pub fn new() -> Self {
        Self { inner: HeartbeatOutputter::new(Duration::from_secs(5)) }
    }

    pub fn due(&mut self, connected: bool) -> bool {
        self.inner.due(connected)
    }
}

pub struct IfsfHeartBeatOutputter {
    inner: HeartbeatOutputter,
}

impl Default for IfsfHeartBeatOutputter {
    fn default() -> Self {
        Self::new()
    }
}

impl IfsfHeartBeatOutputter {
    pub fn new() -> Self {
        Self { inner: HeartbeatOutputter::new(Duration::from_secs(10)) }
    }

    pub fn due(&mut self, connected: bool) -> bool {
        self.inner.due(connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_immediately_on_first_connected_tick() {
        let mut hb = TransitHeartBeatOutputter::new();
        assert!(hb.due(true));
    }

    #[test]
    fn disconnection_suppresses_and_resets() {
        let mut hb = TransitHeartBeatOutputter::new();
        assert!(hb.due(true));
        assert!(!hb.due(false));
        assert!(hb.due(true));
    }
}
