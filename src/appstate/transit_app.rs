// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `IngenicoTransitApp` (component C5, spec §3/§4.5): derived state of the
//! remote Transit app. A pure reducer over the event stream — every setter
//! compares old/new and publishes only on change.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::events::EventBus;
use crate::wire::tags::TerminalStatus;

/// Events published by `IngenicoTransitApp` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitAppEvent {
    TcpConnection { connected: bool },
    AppAlive { alive: bool },
    TerminalStatus { status: TerminalStatusValue },
    MessageIdSyncedAfterError { message_id: u8 },
}

/// `TerminalStatus` is not `Eq` over `Unknown(u8)` ambiguity-free by itself
/// in the public wire module, so the app tracks a comparable wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalStatusValue(pub Option<TerminalStatusCode>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatusCode {
    Null,
    Idle,
    Tap,
    Busy,
    Unknown(u8),
}

impl From<TerminalStatus> for TerminalStatusCode {
    fn from(s: TerminalStatus) -> Self {
        match s {
            TerminalStatus::Null => Self::Null,
            TerminalStatus::Idle => Self::Idle,
            TerminalStatus::Tap => Self::Tap,
            TerminalStatus::Busy => Self::Busy,
            TerminalStatus::Unknown(b) => Self::Unknown(b),
        }
    }
}

pub struct IngenicoTransitApp {
    connected: bool,
    socket_address: Option<SocketAddr>,
    last_rx_at: Option<Instant>,
    app_alive: bool,
    terminal_status: Option<TerminalStatusCode>,
    app_alive_timeout: Duration,
    events: EventBus<TransitAppEvent>,
}

impl IngenicoTransitApp {
    pub fn new(app_alive_timeout: Duration) -> Self {
        Self {
            connected: false,
            socket_address: None,
            last_rx_at: None,
            app_alive: false,
            terminal_status: None,
            app_alive_timeout,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> EventBus<TransitAppEvent> {
        self.events.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn socket_address(&self) -> Option<SocketAddr> {
        self.socket_address
    }

    pub fn is_app_alive(&self) -> bool {
        self.app_alive
    }

    pub fn terminal_status(&self) -> Option<TerminalStatusCode> {
        self.terminal_status
    }

    /// `connected ⇒ socket_address names the peer`; disconnect resets
    /// `app_alive=false` and terminal status to `NULL` (spec §3 invariant).
    pub fn on_connected(&mut self, addr: SocketAddr) {
        if self.connected && self.socket_address == Some(addr) {
            return;
        }
        self.connected = true;
        self.socket_address = Some(addr);
        self.events.publish(TransitAppEvent::TcpConnection { connected: true });
    }

    pub fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.socket_address = None;
        self.events.publish(TransitAppEvent::TcpConnection { connected: false });
        self.set_app_alive(false);
        self.set_terminal_status(Some(TerminalStatusCode::Null));
    }

    /// Record that valid traffic was received; recomputes `app_alive`.
    pub fn on_traffic_received(&mut self) {
        self.last_rx_at = Some(Instant::now());
        self.set_app_alive(true);
    }

    /// Re-derive `app_alive` from elapsed time (spec §3: 15s default
    /// threshold); called once per master-loop tick.
    pub fn refresh_liveness(&mut self) {
        let alive = match self.last_rx_at {
            Some(t) => t.elapsed() < self.app_alive_timeout,
            None => false,
        };
        self.set_app_alive(alive);
    }

    fn set_app_alive(&mut self, alive: bool) {
        if self.app_alive == alive {
            return;
        }
        self.app_alive = alive;
        self.events.publish(TransitAppEvent::AppAlive { alive });
    }

    pub fn set_terminal_status(&mut self, status: Option<TerminalStatusCode>) {
        if self.terminal_status == status {
            return;
        }
        self.terminal_status = status;
        self.events.publish(TransitAppEvent::TerminalStatus {
            status: TerminalStatusValue(status),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::recv_skip_lagged;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    #[tokio::test]
    async fn disconnect_resets_app_alive_and_terminal_status() {
        let mut app = IngenicoTransitApp::new(Duration::from_millis(15_000));
        let mut rx = app.events();
        let mut rx = rx.subscribe();

        app.on_connected(addr());
        app.on_traffic_received();
        app.set_terminal_status(Some(TerminalStatusCode::Idle));
        app.on_disconnected();

        assert!(!app.is_connected());
        assert!(!app.is_app_alive());
        assert_eq!(app.terminal_status(), Some(TerminalStatusCode::Null));

        // Drain the fixed number of events the cascade above publishes and
        // assert the disconnect ones are among them.
        let mut events = Vec::new();
        for _ in 0..4 {
            if let Some(event) = recv_skip_lagged(&mut rx).await {
                events.push(event);
            }
        }
        assert!(events.contains(&TransitAppEvent::TcpConnection { connected: false }));
        assert!(events.contains(&TransitAppEvent::AppAlive { alive: false }));
    }

    #[test]
    fn identical_value_publications_are_suppressed() {
        let mut app = IngenicoTransitApp::new(Duration::from_millis(15_000));
        app.on_connected(addr());
        // Re-publishing an already-connected address is a no-op setter.
        let before = app.is_connected();
        app.on_connected(addr());
        assert_eq!(before, app.is_connected());
    }

    #[test]
    fn liveness_expires_after_timeout() {
        let mut app = IngenicoTransitApp::new(Duration::from_millis(0));
        app.on_traffic_received();
        app.refresh_liveness();
        assert!(!app.is_app_alive());
    }
}
