// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Types shared by the card-tap session controller (component C7, spec §3/§4.7).

use std::time::{Duration, Instant};

use crate::wire::tags::ResponseCode;

/// Who currently owns the active `CardTappingRequest` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardTapSource {
    Unspecified,
    Main,
    Sale,
    CardInfo,
    SamUnlock,
    CardRead,
}

/// Data handed to a requester's `on_detected` callback (spec §4.7 `STARTED`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDetectedData {
    pub response_code: ResponseCode,
    pub card_type: Option<u8>,
    pub uid: Vec<u8>,
}

/// A registered request for the next card tap. At most one is active at any
/// time (spec §4.7 invariant); a new request from a different source
/// replaces the previous one, whose callbacks are then never invoked again.
pub struct CardTappingRequest {
    pub source: CardTapSource,
    pub on_detected: Box<dyn FnMut(CardDetectedData) + Send>,
    pub on_error: Box<dyn FnMut() + Send>,
}

impl CardTappingRequest {
    pub fn new(
        source: CardTapSource,
        on_detected: impl FnMut(CardDetectedData) + Send + 'static,
        on_error: impl FnMut() + Send + 'static,
    ) -> Self {
        Self { source, on_detected: Box::new(on_detected), on_error: Box::new(on_error) }
    }
}

/// The card-tap FSM's state set (spec §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ECardTapSessionState {
    Inactive,
    StartingCheckingStatus1,
    StartingBackToIdle,
    StartingCheckingStatus2,
    StartingLedOn,
    Started,
    StoppingLedOff,
}

/// Per-state attempt budget: a response not received within `period` counts
/// as one failed attempt; after `max_attempts` the state gives up.
#[derive(Debug, Clone, Copy)]
pub struct AttemptMonitor {
    pub period: Duration,
    pub max_attempts: u32,
    attempts_used: u32,
    sent_at: Option<Instant>,
}

impl AttemptMonitor {
    pub fn new(period: Duration, max_attempts: u32) -> Self {
        Self { period, max_attempts, attempts_used: 0, sent_at: None }
    }

    pub fn reset(&mut self) {
        self.attempts_used = 0;
        self.sent_at = None;
    }

    pub fn record_attempt(&mut self) {
        self.attempts_used += 1;
        self.sent_at = Some(Instant::now());
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_used >= self.max_attempts
    }

    pub fn period_elapsed(&self) -> bool {
        self.sent_at.map(|t| t.elapsed() >= self.period).unwrap_or(false)
    }
}

impl ECardTapSessionState {
    /// Attempt-monitor parameters for starting states (spec §4.7); `STARTED`
    /// and the idle/terminal states carry no attempt budget of their own.
    pub fn attempt_monitor(self) -> Option<AttemptMonitor> {
        match self {
            Self::StartingCheckingStatus1 => Some(AttemptMonitor::new(Duration::from_millis(350), 2)),
            Self::StartingBackToIdle => Some(AttemptMonitor::new(Duration::from_millis(500), 2)),
            Self::StartingCheckingStatus2 => Some(AttemptMonitor::new(Duration::from_millis(250), 5)),
            Self::StartingLedOn => Some(AttemptMonitor::new(Duration::from_millis(250), 2)),
            Self::StoppingLedOff => Some(AttemptMonitor::new(Duration::from_millis(250), 2)),
            Self::Inactive | Self::Started => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_monitor_exhausts_after_max_attempts() {
        let mut m = AttemptMonitor::new(Duration::from_millis(10), 2);
        assert!(!m.is_exhausted());
        m.record_attempt();
        assert!(!m.is_exhausted());
        m.record_attempt();
        assert!(m.is_exhausted());
    }

    #[test]
    fn period_elapsed_false_before_any_attempt() {
        let m = AttemptMonitor::new(Duration::from_millis(10), 2);
        assert!(!m.period_elapsed());
    }
}
