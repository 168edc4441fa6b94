// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `IngenicoIfsfApp` (component C5, spec §3/§4.5): derived state of the
//! remote IFSF app, including terminal identity and the DUK payment token
//! preference rule (`TOKEN` over any `TOKEN*` fallback key).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::events::EventBus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfsfAppEvent {
    TcpConnection { connected: bool },
    AppAlive { alive: bool },
    TerminalIdChanged { terminal_id: Option<String> },
}

pub struct IngenicoIfsfApp {
    connected: bool,
    socket_address: Option<SocketAddr>,
    last_diagnosis_response_at: Option<Instant>,
    app_alive: bool,
    terminal_id: Option<String>,
    private_data: HashMap<String, String>,
    app_alive_timeout: Duration,
    events: EventBus<IfsfAppEvent>,
}

impl IngenicoIfsfApp {
    pub fn new(app_alive_timeout: Duration) -> Self {
        Self {
            connected: false,
            socket_address: None,
            last_diagnosis_response_at: None,
            app_alive: false,
            terminal_id: None,
            private_data: HashMap::new(),
            app_alive_timeout,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> EventBus<IfsfAppEvent> {
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

    pub fn terminal_id(&self) -> Option<&str> {
        self.terminal_id.as_deref()
    }

    pub fn on_connected(&mut self, addr: SocketAddr) {
        if self.connected && self.socket_address == Some(addr) {
            return;
        }
        self.connected = true;
        self.socket_address = Some(addr);
        self.events.publish(IfsfAppEvent::TcpConnection { connected: true });
    }

    pub fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.socket_address = None;
        self.events.publish(IfsfAppEvent::TcpConnection { connected: false });
        self.set_app_alive(false);
    }

    /// Record that a Diagnosis response was received; `is_app_alive` is
    /// based on time-since-last-diagnosis-response (spec §4.5, 15s default).
    pub fn on_diagnosis_response(&mut self) {
        self.last_diagnosis_response_at = Some(Instant::now());
        self.set_app_alive(true);
    }

    pub fn refresh_liveness(&mut self) {
        let alive = match self.last_diagnosis_response_at {
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
        self.events.publish(IfsfAppEvent::AppAlive { alive });
    }

    pub fn set_terminal_id(&mut self, terminal_id: Option<String>) {
        if self.terminal_id == terminal_id {
            return;
        }
        self.terminal_id = terminal_id.clone();
        self.events.publish(IfsfAppEvent::TerminalIdChanged { terminal_id });
    }

    pub fn set_private_data(&mut self, key: String, value: String) {
        self.private_data.insert(key, value);
    }

    /// DUK payment token lookup: prefer the exact `TOKEN` key, falling back
    /// to the first `TOKEN*`-prefixed key present (spec §4.5).
    pub fn payment_token(&self) -> Option<&str> {
        if let Some(v) = self.private_data.get("TOKEN") {
            return Some(v);
        }
        self.private_data
            .iter()
            .find(|(k, _)| k.starts_with("TOKEN"))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_token_prefers_exact_token_key() {
        let mut app = IngenicoIfsfApp::new(Duration::from_millis(15_000));
        app.set_private_data("TOKEN_LEGACY".to_owned(), "legacy".to_owned());
        app.set_private_data("TOKEN".to_owned(), "preferred".to_owned());
        assert_eq!(app.payment_token(), Some("preferred"));
    }

    #[test]
    fn payment_token_falls_back_to_prefixed_key() {
        let mut app = IngenicoIfsfApp::new(Duration::from_millis(15_000));
        app.set_private_data("TOKEN_V2".to_owned(), "fallback".to_owned());
        assert_eq!(app.payment_token(), Some("fallback"));
    }

    #[test]
    fn payment_token_absent_when_no_token_key() {
        let app = IngenicoIfsfApp::new(Duration::from_millis(15_000));
        assert_eq!(app.payment_token(), None);
    }

    #[test]
    fn liveness_tracks_diagnosis_responses_not_any_traffic() {
        let mut app = IngenicoIfsfApp::new(Duration::from_millis(0));
        app.on_diagnosis_response();
        app.refresh_liveness();
        assert!(!app.is_app_alive());
    }
}
