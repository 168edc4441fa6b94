// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master loop (component C10, spec §4.10): a single dedicated task that
//! owns every piece of protocol/FSM state and ticks it at a fixed cadence.
//! Background tasks (orchestrators, OPTs) never touch that state directly;
//! they reach it through [`MasterLoopHandle`], which relays requests over a
//! command channel and exposes read-only snapshots plus the independently
//! mutex-guarded `SessionManager` (spec §5 "shared-resource policy").

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::appstate::ifsf_app::IngenicoIfsfApp;
use crate::appstate::sam_duk::{SamDuk, UnlockStatus};
use crate::appstate::transit_app::{IngenicoTransitApp, TerminalStatusCode};
use crate::config::CoreConfig;
use crate::controller::{IfsfController, TransitController};
use crate::error::CoreError;
use crate::net::{EndpointEvent, TcpEndpoint};
use crate::orchestrator::session::SessionManager;
use crate::proxy::{IfsfProxy, TransitProxy};
use crate::tapctl::{CardTapSource, CardTappingRequest};
use crate::wire::cipher::SessionCipher;
use crate::wire::frame::TransitFrame;
use crate::wire::tlv::Payload;

/// Read-only point-in-time view of master-loop state, refreshed once per
/// sweep and shared with background tasks via `Arc<RwLock<_>>` (spec §5).
#[derive(Debug, Clone)]
pub struct CoreSnapshot {
    pub transit_connected: bool,
    pub transit_alive: bool,
    pub ifsf_alive: bool,
    pub reader_ready: bool,
    pub is_duk_atr: bool,
    pub sam_authenticated: bool,
    pub sam_unlock_status: UnlockStatus,
    pub sam_slot_index: Option<u8>,
    pub sam_cipher: Option<SessionCipher>,
    pub maintenance_active: bool,
    pub terminal_id: Option<String>,
}

impl Default for CoreSnapshot {
    fn default() -> Self {
        Self {
            transit_connected: false,
            transit_alive: false,
            ifsf_alive: false,
            reader_ready: false,
            is_duk_atr: false,
            sam_authenticated: false,
            sam_unlock_status: UnlockStatus::Unknown,
            sam_slot_index: None,
            sam_cipher: None,
            maintenance_active: false,
            terminal_id: None,
        }
    }
}

/// Requests a background task can hand to the master loop.
pub enum Command {
    SendTransit { payload: Payload, timeout: Duration, reply: oneshot::Sender<Option<TransitFrame>> },
    SetCardTapRequest { request: CardTappingRequest },
    ClearCardTapRequest { source: CardTapSource },
    StopCardTapping { led_off: bool },
    AcknowledgeDetectionConsumed,
    SetSamUnlockStatus { status: UnlockStatus },
    SetMaintenanceActive { active: bool },
}

/// Cheap, cloneable handle background tasks use to reach the master loop.
#[derive(Clone)]
pub struct MasterLoopHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    snapshot: Arc<RwLock<CoreSnapshot>>,
    sessions: Arc<SessionManager>,
}

impl MasterLoopHandle {
    pub async fn snapshot(&self) -> CoreSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Issue one Transit request via the master loop's proxy and await its
    /// correlated response (or `ResponseTimeout`, spec §5).
    pub async fn send_transit(&self, payload: Payload, timeout: Duration) -> Result<TransitFrame, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::SendTransit { payload, timeout, reply })
            .map_err(|_| CoreError::CardTappingUnavailable)?;
        match rx.await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(CoreError::ResponseTimeout),
            Err(_) => Err(CoreError::ResponseTimeout),
        }
    }

    /// Returns `Err(CardTappingUnavailable)` if the master loop task has
    /// already exited and cannot receive the request (spec §6); callers must
    /// not report session creation as successful in that case.
    pub fn set_card_tapping_request(&self, request: CardTappingRequest) -> Result<(), CoreError> {
        self.command_tx
            .send(Command::SetCardTapRequest { request })
            .map_err(|_| CoreError::CardTappingUnavailable)
    }

    pub fn clear_card_tapping_request(&self, source: CardTapSource) {
        let _ = self.command_tx.send(Command::ClearCardTapRequest { source });
    }

    pub fn stop_card_tapping(&self, led_off: bool) {
        let _ = self.command_tx.send(Command::StopCardTapping { led_off });
    }

    pub fn acknowledge_detection_consumed(&self) {
        let _ = self.command_tx.send(Command::AcknowledgeDetectionConsumed);
    }

    pub fn set_sam_unlock_status(&self, status: UnlockStatus) {
        let _ = self.command_tx.send(Command::SetSamUnlockStatus { status });
    }

    pub fn set_maintenance_active(&self, active: bool) {
        let _ = self.command_tx.send(Command::SetMaintenanceActive { active });
    }
}

/// Owns every piece of protocol state and drives it at `master_loop_interval`
/// cadence (spec §4.10). Never shared across tasks — only `MasterLoopHandle`
/// crosses task boundaries.
pub struct MasterLoop {
    config: CoreConfig,
    transit_proxy: TransitProxy,
    ifsf_proxy: IfsfProxy,
    transit_app: IngenicoTransitApp,
    ifsf_app: IngenicoIfsfApp,
    sam: SamDuk,
    transit_controller: TransitController,
    ifsf_controller: IfsfController,
    transit_endpoint_events: broadcast::Receiver<EndpointEvent>,
    ifsf_endpoint_events: broadcast::Receiver<EndpointEvent>,
    maintenance_active: bool,
    maintenance_activated_at: Option<Instant>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    snapshot: Arc<RwLock<CoreSnapshot>>,
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
}

impl MasterLoop {
    pub fn new(
        config: CoreConfig,
        transit_endpoint: TcpEndpoint,
        ifsf_endpoint: TcpEndpoint,
        sessions: Arc<SessionManager>,
        shutdown: CancellationToken,
    ) -> (Self, MasterLoopHandle) {
        let transit_endpoint_events = transit_endpoint.events().subscribe();
        let ifsf_endpoint_events = ifsf_endpoint.events().subscribe();

        let mut transit_proxy = TransitProxy::new(transit_endpoint, crate::events::EventBus::new());
        let mut ifsf_proxy = IfsfProxy::new(ifsf_endpoint);
        transit_proxy.open();
        ifsf_proxy.open();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(CoreSnapshot::default()));

        let app_alive_timeout = config.app_alive_timeout();
        let this = Self {
            config,
            transit_proxy,
            ifsf_proxy,
            transit_app: IngenicoTransitApp::new(app_alive_timeout),
            ifsf_app: IngenicoIfsfApp::new(app_alive_timeout),
            sam: SamDuk::new(0),
            transit_controller: TransitController::new(),
            ifsf_controller: IfsfController::new(),
            transit_endpoint_events,
            ifsf_endpoint_events,
            maintenance_active: false,
            maintenance_activated_at: None,
            command_rx,
            snapshot: Arc::clone(&snapshot),
            sessions: Arc::clone(&sessions),
            shutdown,
        };

        let handle = MasterLoopHandle { command_tx, snapshot, sessions };
        (this, handle)
    }

    /// Run until cancelled. Each sweep: drain commands, drain endpoint
    /// connect/disconnect events, tick both controllers, sweep expired
    /// sessions, and publish a fresh snapshot.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.master_loop_interval());
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        tracing::info!("master loop shut down");
    }

    async fn tick(&mut self) {
        self.drain_commands().await;
        self.drain_endpoint_events();
        self.refresh_liveness();
        self.expire_maintenance();

        if let Some(target) = self.transit_app.socket_address() {
            let incoming = self
                .transit_controller
                .tick(&mut self.transit_proxy, target, self.transit_app.is_app_alive(), &mut self.sam, self.maintenance_active)
                .await;
            for frame in incoming {
                if let Some(status) = frame.payload.status() {
                    self.transit_app.set_terminal_status(Some(TerminalStatusCode::from(status)));
                }
            }
        }

        if let Some(target) = self.ifsf_app.socket_address() {
            let _incoming = self
                .ifsf_controller
                .tick(&mut self.ifsf_proxy, &mut self.ifsf_app, target, self.ifsf_app.is_connected())
                .await;
        }

        self.sessions.sweep_expired(self.config.session_expiry());
        self.publish_snapshot().await;
    }

    async fn drain_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                Command::SendTransit { payload, timeout, reply } => {
                    if let Some(target) = self.transit_app.socket_address() {
                        let rx = self.transit_proxy.send(target, payload, timeout).await;
                        tokio::spawn(async move {
                            let result = rx.await.unwrap_or(None);
                            let _ = reply.send(result);
                        });
                    } else {
                        let _ = reply.send(None);
                    }
                }
                Command::SetCardTapRequest { request } => {
                    self.transit_controller.tap_controller().set_request(request);
                }
                Command::ClearCardTapRequest { source } => {
                    self.transit_controller.tap_controller().clear_request(source);
                }
                Command::StopCardTapping { led_off } => {
                    self.transit_controller.tap_controller().stop(led_off);
                }
                Command::AcknowledgeDetectionConsumed => {
                    self.transit_controller.tap_controller().acknowledge_detection_consumed();
                }
                Command::SetSamUnlockStatus { status } => {
                    self.sam.set_unlock_status(status);
                }
                Command::SetMaintenanceActive { active } => {
                    self.maintenance_active = active;
                    self.maintenance_activated_at = if active { Some(Instant::now()) } else { None };
                }
            }
        }
    }

    fn drain_endpoint_events(&mut self) {
        loop {
            match self.transit_endpoint_events.try_recv() {
                Ok(EndpointEvent::ClientConnected { addr }) => self.transit_app.on_connected(addr),
                Ok(EndpointEvent::ClientDisconnected { .. }) => {
                    self.transit_app.on_disconnected();
                    self.transit_proxy.reset_outstanding();
                    self.transit_controller.reset_on_disconnect(&mut self.sam);
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        loop {
            match self.ifsf_endpoint_events.try_recv() {
                Ok(EndpointEvent::ClientConnected { addr }) => self.ifsf_app.on_connected(addr),
                Ok(EndpointEvent::ClientDisconnected { .. }) => {
                    self.ifsf_app.on_disconnected();
                    self.ifsf_proxy.reset_outstanding();
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    /// Transit liveness is derived from raw socket traffic (any bytes, not
    /// just matched responses); IFSF liveness is driven entirely by
    /// Diagnosis responses inside `IfsfController::tick` (spec §4.5).
    fn refresh_liveness(&mut self) {
        if self.transit_proxy.endpoint().is_elapsed_from_last_rx(self.config.app_alive_timeout_ms) {
            self.transit_app.refresh_liveness();
        } else {
            self.transit_app.on_traffic_received();
        }
        self.ifsf_app.refresh_liveness();
    }

    /// Clears `maintenance_active` once it has been set for longer than
    /// `config.maintenance_timeout()` (spec §4.7: "auto-expires after 20
    /// minutes"). Maintenance mode is otherwise sticky.
    fn expire_maintenance(&mut self) {
        if !self.maintenance_active {
            return;
        }
        let Some(activated_at) = self.maintenance_activated_at else { return };
        if activated_at.elapsed() >= self.config.maintenance_timeout() {
            tracing::info!("maintenance mode auto-expired");
            self.maintenance_active = false;
            self.maintenance_activated_at = None;
        }
    }

    async fn publish_snapshot(&self) {
        let snap = CoreSnapshot {
            transit_connected: self.transit_app.is_connected(),
            transit_alive: self.transit_app.is_app_alive(),
            ifsf_alive: self.ifsf_app.is_app_alive(),
            reader_ready: self.transit_controller.reader_init().init_status_done(),
            is_duk_atr: self.sam.atr().is_duk_atr(),
            sam_authenticated: self.sam.is_authenticated(),
            sam_unlock_status: self.sam.unlock_status(),
            sam_slot_index: self.transit_controller.reader_init().sam_slot_index(),
            sam_cipher: self.sam.session_cipher().cloned(),
            maintenance_active: self.maintenance_active,
            terminal_id: self.ifsf_app.terminal_id().map(str::to_owned),
        };
        *self.snapshot.write().await = snap;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn test_config() -> CoreConfig {
        CoreConfig {
            transit_port: 0,
            ifsf_port: 0,
            reader_peer_port: 2914,
            app_alive_timeout_ms: 15_000,
            master_loop_interval_ms: 15,
            session_expiry_ms: 300_000,
            maintenance_timeout_ms: 1_200_000,
            properties_path: PathBuf::from("emv.properties"),
        }
    }

    #[tokio::test]
    async fn fresh_snapshot_reports_nothing_ready() {
        let shutdown = CancellationToken::new();
        let transit = TcpEndpoint::bind("transit", 0, shutdown.clone()).await.expect("bind transit");
        let ifsf = TcpEndpoint::bind("ifsf", 0, shutdown.clone()).await.expect("bind ifsf");
        let sessions = Arc::new(SessionManager::new());
        let (mut master_loop, handle) = MasterLoop::new(test_config(), transit, ifsf, sessions, shutdown);

        master_loop.tick().await;
        let snapshot = handle.snapshot().await;

        assert!(!snapshot.transit_connected);
        assert!(!snapshot.transit_alive);
        assert!(!snapshot.reader_ready);
        assert!(!snapshot.is_duk_atr);
        assert!(!snapshot.sam_authenticated);
        assert_eq!(snapshot.sam_unlock_status, UnlockStatus::Unknown);
        assert!(snapshot.sam_slot_index.is_none());
        assert!(snapshot.sam_cipher.is_none());
    }

    #[tokio::test]
    async fn maintenance_mode_expires_after_configured_timeout() {
        let shutdown = CancellationToken::new();
        let transit = TcpEndpoint::bind("transit", 0, shutdown.clone()).await.expect("bind transit");
        let ifsf = TcpEndpoint::bind("ifsf", 0, shutdown.clone()).await.expect("bind ifsf");
        let sessions = Arc::new(SessionManager::new());
        let mut config = test_config();
        config.maintenance_timeout_ms = 1;
        let (mut master_loop, handle) = MasterLoop::new(config, transit, ifsf, sessions, shutdown);

        handle.set_maintenance_active(true);
        master_loop.tick().await;
        assert!(handle.snapshot().await.maintenance_active);

        tokio::time::sleep(Duration::from_millis(5)).await;
        master_loop.tick().await;
        assert!(!handle.snapshot().await.maintenance_active);
    }

    #[tokio::test]
    async fn shutdown_token_stops_run() {
        let shutdown = CancellationToken::new();
        let transit = TcpEndpoint::bind("transit", 0, shutdown.clone()).await.expect("bind transit");
        let ifsf = TcpEndpoint::bind("ifsf", 0, shutdown.clone()).await.expect("bind ifsf");
        let sessions = Arc::new(SessionManager::new());
        let (master_loop, _handle) = MasterLoop::new(test_config(), transit, ifsf, sessions, shutdown.clone());

        let join = tokio::spawn(master_loop.run());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), join).await.expect("run exits promptly").expect("no panic");
    }
}
