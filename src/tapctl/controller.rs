// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `CardTapController` (component C7, spec §4.7) — the central FSM.
//!
//! Places the terminal into TAP mode, drives LED on/off, polls
//! `CL_CARD_INFO`, and delivers detection events to exactly one current
//! requester. Ticked on the master-loop task; all transitions and callback
//! invocations happen on that same task, so no lock is needed for the FSM
//! itself (spec §4.7 "Ordering guarantees").

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::proxy::transit_proxy::TransitProxy;
use crate::tapctl::session_state::{
    AttemptMonitor, CardDetectedData, CardTapSource, CardTappingRequest, ECardTapSessionState,
};
use crate::wire::frame::TransitFrame;
use crate::wire::tags::{Command, LedOperation, TerminalStatus};
use crate::wire::tlv::PayloadBuilder;

/// Poll period while `STARTED`; tightened by 100ms when the last poll found
/// no card in the field (spec §4.7).
const STARTED_POLL_PERIOD: Duration = Duration::from_millis(1500);
const STARTED_POLL_PERIOD_TIGHT: Duration = Duration::from_millis(1400);
const STARTED_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1450);

/// Readiness inputs the controller checks every tick (spec §4.7 preconditions
/// and abort condition). All fields are snapshots the master loop refreshes
/// once per sweep before ticking this controller.
#[derive(Debug, Clone, Copy)]
pub struct TapPreconditions {
    pub reader_ready: bool,
    pub transit_alive: bool,
    pub sam_authenticated: bool,
    pub maintenance_active: bool,
}

impl TapPreconditions {
    fn all_ok(self) -> bool {
        self.reader_ready && self.transit_alive && self.sam_authenticated && !self.maintenance_active
    }
}

enum Pending {
    Transit(oneshot::Receiver<Option<TransitFrame>>),
}

pub struct CardTapController {
    state: ECardTapSessionState,
    monitor: Option<AttemptMonitor>,
    pending: Option<Pending>,
    request: Option<CardTappingRequest>,
    led_off_while_inactive_flag: bool,
    led_off_on_stopping_flag: bool,
    card_detected_in_field: bool,
    next_poll_period: Duration,
}

impl Default for CardTapController {
    fn default() -> Self {
        Self::new()
    }
}

impl CardTapController {
    pub fn new() -> Self {
        Self {
            state: ECardTapSessionState::Inactive,
            monitor: None,
            pending: None,
            request: None,
            led_off_while_inactive_flag: false,
            led_off_on_stopping_flag: false,
            card_detected_in_field: false,
            next_poll_period: STARTED_POLL_PERIOD,
        }
    }

    pub fn state(&self) -> ECardTapSessionState {
        self.state
    }

    pub fn has_active_request(&self) -> bool {
        self.request.is_some()
    }

    /// Install a new request, replacing (and silently dropping the
    /// callbacks of) any previous one — spec §4.7 invariant and §9 open
    /// question resolution ("this spec chooses silent drop").
    pub fn set_request(&mut self, request: CardTappingRequest) {
        self.request = Some(request);
    }

    /// Remove the active request only if it still belongs to `source`.
    pub fn clear_request(&mut self, source: CardTapSource) {
        if matches!(&self.request, Some(r) if r.source == source) {
            self.request = None;
        }
    }

    /// Request an immediate stop; remembers whether LED should be turned off
    /// on the way back to `INACTIVE` (spec §4.7 `led_off_on_stopping_flag`).
    pub fn stop(&mut self, led_off: bool) {
        self.led_off_on_stopping_flag = led_off;
        if !matches!(self.state, ECardTapSessionState::Inactive | ECardTapSessionState::StoppingLedOff) {
            self.transition_to_stopping();
        }
    }

    /// Lazily flush a remembered "turn LED off" request while `INACTIVE`
    /// (spec §4.7).
    pub fn set_led_diodes_off_if_inactive(&mut self) {
        if self.state == ECardTapSessionState::Inactive {
            self.led_off_while_inactive_flag = true;
        }
    }

    fn transition_to_stopping(&mut self) {
        self.state = ECardTapSessionState::StoppingLedOff;
        self.monitor = ECardTapSessionState::StoppingLedOff.attempt_monitor();
        self.pending = None;
    }

    fn transition_to(&mut self, state: ECardTapSessionState) {
        self.state = state;
        self.monitor = state.attempt_monitor();
        self.pending = None;
    }

    /// Drive one master-loop tick.
    pub async fn tick(&mut self, proxy: &mut TransitProxy, target: SocketAddr, pre: TapPreconditions) {
        // Abort condition: from any non-INACTIVE, non-STOPPING state, losing
        // a precondition (or the request itself) forces an immediate stop.
        let has_request = self.request.is_some();
        if !matches!(self.state, ECardTapSessionState::Inactive | ECardTapSessionState::StoppingLedOff)
            && (!has_request || !pre.all_ok())
        {
            self.transition_to_stopping();
        }

        match self.state {
            ECardTapSessionState::Inactive => self.tick_inactive(proxy, target, pre).await,
            ECardTapSessionState::StartingCheckingStatus1 => {
                self.tick_checking_status(proxy, target, ECardTapSessionState::StartingLedOn).await
            }
            ECardTapSessionState::StartingBackToIdle => self.tick_back_to_idle(proxy, target).await,
            ECardTapSessionState::StartingCheckingStatus2 => {
                self.tick_checking_status(proxy, target, ECardTapSessionState::StartingLedOn).await
            }
            ECardTapSessionState::StartingLedOn => self.tick_led_on(proxy, target).await,
            ECardTapSessionState::Started => self.tick_started(proxy, target).await,
            ECardTapSessionState::StoppingLedOff => self.tick_stopping(proxy, target).await,
        }
    }

    async fn tick_inactive(&mut self, proxy: &mut TransitProxy, target: SocketAddr, pre: TapPreconditions) {
        if self.request.is_some() && pre.all_ok() {
            self.transition_to(ECardTapSessionState::StartingCheckingStatus1);
            self.send_get_state(proxy, target).await;
            return;
        }
        if self.led_off_while_inactive_flag {
            self.led_off_while_inactive_flag = false;
            let payload = PayloadBuilder::new()
                .command(Command::LedDi0dState)
                .led_number(0x0F)
                .led_operation(LedOperation::Off)
                .target_pinpad(0x01)
                .build();
            let _ = proxy.send(target, payload, Duration::from_millis(250)).await;
        }
    }

    async fn send_get_state(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        let payload = PayloadBuilder::new().command(Command::GetState).build();
        let rx = proxy.send(target, payload, self.monitor.map(|m| m.period).unwrap_or(Duration::from_millis(350))).await;
        if let Some(m) = self.monitor.as_mut() {
            m.record_attempt();
        }
        self.pending = Some(Pending::Transit(rx));
    }

    async fn send_back_to_idle(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        let payload = PayloadBuilder::new().command(Command::BackToIdle).build();
        let rx = proxy.send(target, payload, self.monitor.map(|m| m.period).unwrap_or(Duration::from_millis(500))).await;
        if let Some(m) = self.monitor.as_mut() {
            m.record_attempt();
        }
        self.pending = Some(Pending::Transit(rx));
    }

    async fn send_led(&mut self, proxy: &mut TransitProxy, target: SocketAddr, led: u8, op: LedOperation) {
        let payload = PayloadBuilder::new()
            .command(Command::LedDi0dState)
            .led_number(led)
            .led_operation(op)
            .target_pinpad(0x01)
            .build();
        let rx = proxy.send(target, payload, self.monitor.map(|m| m.period).unwrap_or(Duration::from_millis(250))).await;
        if let Some(m) = self.monitor.as_mut() {
            m.record_attempt();
        }
        self.pending = Some(Pending::Transit(rx));
    }

    fn take_response(&mut self) -> Option<Option<TransitFrame>> {
        match self.pending.as_mut() {
            Some(Pending::Transit(rx)) => match rx.try_recv() {
                Ok(frame) => {
                    self.pending = None;
                    Some(frame)
                }
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.pending = None;
                    Some(None)
                }
            },
            None => None,
        }
    }

    async fn tick_checking_status(
        &mut self,
        proxy: &mut TransitProxy,
        target: SocketAddr,
        on_idle: ECardTapSessionState,
    ) {
        if self.pending.is_none() {
            self.send_get_state(proxy, target).await;
            return;
        }
        let Some(response) = self.take_response() else { return };
        match response {
            Some(frame) if frame.payload.status() == Some(TerminalStatus::Idle) => {
                self.transition_to(on_idle);
                self.send_led(proxy, target, 0x01, LedOperation::On).await;
            }
            Some(_) => {
                if self.state == ECardTapSessionState::StartingCheckingStatus1 {
                    self.transition_to(ECardTapSessionState::StartingBackToIdle);
                    self.send_back_to_idle(proxy, target).await;
                } else if self.monitor.map(|m| m.is_exhausted()).unwrap_or(true) {
                    self.transition_to(ECardTapSessionState::Inactive);
                } else {
                    self.send_get_state(proxy, target).await;
                }
            }
            None => {
                if self.monitor.map(|m| m.is_exhausted()).unwrap_or(true) {
                    self.transition_to(ECardTapSessionState::Inactive);
                } else {
                    self.send_get_state(proxy, target).await;
                }
            }
        }
    }

    async fn tick_back_to_idle(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        if self.pending.is_none() {
            self.send_back_to_idle(proxy, target).await;
            return;
        }
        // Any response — even ERR_CMD_EXEC ("already idle") — advances us.
        if self.take_response().is_some() {
            self.transition_to(ECardTapSessionState::StartingCheckingStatus2);
            self.send_get_state(proxy, target).await;
        }
    }

    async fn tick_led_on(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        if self.pending.is_none() {
            self.send_led(proxy, target, 0x01, LedOperation::On).await;
            return;
        }
        let Some(response) = self.take_response() else { return };
        if response.is_some() || self.monitor.map(|m| m.is_exhausted()).unwrap_or(true) {
            // Success, or exhausted attempts — LED state is cosmetic either way.
            self.state = ECardTapSessionState::Started;
            self.monitor = None;
            self.pending = None;
            self.next_poll_period = STARTED_POLL_PERIOD;
        } else {
            self.send_led(proxy, target, 0x01, LedOperation::On).await;
        }
    }

    async fn tick_started(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        if self.card_detected_in_field {
            // Suppressed until the active processor consumes the event by
            // clearing or replacing the request.
            return;
        }
        if self.pending.is_none() {
            let payload = PayloadBuilder::new().command(Command::ClCardInfo).build();
            let rx = proxy.send(target, payload, STARTED_RESPONSE_TIMEOUT).await;
            self.pending = Some(Pending::Transit(rx));
            return;
        }
        let Some(response) = self.take_response() else { return };
        match response {
            Some(frame) if frame.payload.uid().is_none() => {
                self.next_poll_period = STARTED_POLL_PERIOD_TIGHT;
            }
            Some(frame) => {
                let uid = frame.payload.uid().unwrap_or_default().to_vec();
                let response_code = frame.payload.response_code().unwrap_or(crate::wire::tags::ResponseCode::OK);
                let card_type = frame.payload.card_type();
                match self.request.as_mut() {
                    Some(req) => {
                        (req.on_detected)(CardDetectedData { response_code, card_type, uid });
                        self.card_detected_in_field = true;
                    }
                    None => self.transition_to_stopping(),
                }
            }
            None => {
                self.next_poll_period = STARTED_POLL_PERIOD_TIGHT;
            }
        }
    }

    async fn tick_stopping(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        if !self.led_off_on_stopping_flag {
            self.transition_to(ECardTapSessionState::Inactive);
            self.card_detected_in_field = false;
            return;
        }
        if self.pending.is_none() {
            self.send_led(proxy, target, 0x0F, LedOperation::Off).await;
            return;
        }
        let Some(response) = self.take_response() else { return };
        if response.is_some() || self.monitor.map(|m| m.is_exhausted()).unwrap_or(true) {
            self.transition_to(ECardTapSessionState::Inactive);
            self.card_detected_in_field = false;
            self.led_off_on_stopping_flag = false;
        } else {
            self.send_led(proxy, target, 0x0F, LedOperation::Off).await;
        }
    }

    /// Poll period the master loop should wait before ticking `STARTED`
    /// again (spec §4.7: 1500ms nominal, tightened to 1400ms after a miss).
    pub fn next_started_poll_period(&self) -> Duration {
        self.next_poll_period
    }

    /// Called once the active order processor has consumed a detection
    /// event, so the controller resumes polling.
    pub fn acknowledge_detection_consumed(&mut self) {
        self.card_detected_in_field = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::net::TcpEndpoint;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_util::sync::CancellationToken;

    fn target() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2914)
    }

    async fn fresh_proxy() -> TransitProxy {
        let endpoint = TcpEndpoint::bind("transit-test", 0, CancellationToken::new()).await.expect("bind");
        let mut proxy = TransitProxy::new(endpoint, EventBus::new());
        proxy.open();
        proxy
    }

    #[tokio::test]
    async fn inactive_without_request_does_not_transition() {
        let mut ctrl = CardTapController::new();
        let mut proxy = fresh_proxy().await;
        let pre = TapPreconditions {
            reader_ready: true,
            transit_alive: true,
            sam_authenticated: true,
            maintenance_active: false,
        };
        ctrl.tick(&mut proxy, target(), pre).await;
        assert_eq!(ctrl.state(), ECardTapSessionState::Inactive);
    }

    #[tokio::test]
    async fn request_with_preconditions_starts_checking_status() {
        let mut ctrl = CardTapController::new();
        let mut proxy = fresh_proxy().await;
        ctrl.set_request(CardTappingRequest::new(CardTapSource::Main, |_| {}, || {}));
        let pre = TapPreconditions {
            reader_ready: true,
            transit_alive: true,
            sam_authenticated: true,
            maintenance_active: false,
        };
        ctrl.tick(&mut proxy, target(), pre).await;
        assert_eq!(ctrl.state(), ECardTapSessionState::StartingCheckingStatus1);
    }

    #[tokio::test]
    async fn losing_preconditions_forces_stopping() {
        let mut ctrl = CardTapController::new();
        let mut proxy = fresh_proxy().await;
        ctrl.set_request(CardTappingRequest::new(CardTapSource::Main, |_| {}, || {}));
        let pre_ok = TapPreconditions {
            reader_ready: true,
            transit_alive: true,
            sam_authenticated: true,
            maintenance_active: false,
        };
        ctrl.tick(&mut proxy, target(), pre_ok).await;
        assert_eq!(ctrl.state(), ECardTapSessionState::StartingCheckingStatus1);

        let pre_lost = TapPreconditions { transit_alive: false, ..pre_ok };
        ctrl.tick(&mut proxy, target(), pre_lost).await;
        assert_eq!(ctrl.state(), ECardTapSessionState::StoppingLedOff);
    }

    #[test]
    fn set_request_replaces_without_invoking_previous_callbacks() {
        let mut ctrl = CardTapController::new();
        ctrl.set_request(CardTappingRequest::new(CardTapSource::SamUnlock, |_| {}, || {}));
        assert!(ctrl.has_active_request());
        ctrl.set_request(CardTappingRequest::new(CardTapSource::CardRead, |_| {}, || {}));
        assert!(matches!(&ctrl.request, Some(r) if r.source == CardTapSource::CardRead));
    }
}
