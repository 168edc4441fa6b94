// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `IngenicoReaderInitStateMachine` (component C6, spec §4.6): drives the
//! ordered boot sequence — wait for Transit app-alive, query reader
//! identity, query SAM slot presence — computing `init_status_done` once
//! every required precondition is satisfied.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::appstate::sam_duk::{SamAtr, SamDuk};
use crate::proxy::transit_proxy::TransitProxy;
use crate::wire::frame::TransitFrame;
use crate::wire::tags::{Command, TagType};
use crate::wire::tlv::PayloadBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    WaitingAppAlive,
    QueryingIdentity,
    QueryingSamSlots,
    Done,
}

struct AttemptBudget {
    period: Duration,
    max_attempts: u32,
    used: u32,
}

impl AttemptBudget {
    fn new(period: Duration, max_attempts: u32) -> Self {
        Self { period, max_attempts, used: 0 }
    }

    fn reset(&mut self) {
        self.used = 0;
    }

    fn record(&mut self) {
        self.used += 1;
    }

    fn is_exhausted(&self) -> bool {
        self.used >= self.max_attempts
    }
}

pub struct IngenicoReaderInitStateMachine {
    state: InitState,
    pending: Option<oneshot::Receiver<Option<TransitFrame>>>,
    budget: AttemptBudget,
    sam_slot_index: Option<u8>,
}

impl Default for IngenicoReaderInitStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl IngenicoReaderInitStateMachine {
    pub fn new() -> Self {
        Self {
            state: InitState::WaitingAppAlive,
            pending: None,
            budget: AttemptBudget::new(Duration::from_millis(500), 3),
            sam_slot_index: None,
        }
    }

    pub fn init_status_done(&self) -> bool {
        self.state == InitState::Done
    }

    pub fn sam_slot_index(&self) -> Option<u8> {
        self.sam_slot_index
    }

    /// Reset to the beginning of the boot sequence (e.g. on Transit
    /// disconnect — the reader must be re-identified after reconnect).
    pub fn reset(&mut self) {
        self.state = InitState::WaitingAppAlive;
        self.pending = None;
        self.budget.reset();
        self.sam_slot_index = None;
    }

    pub async fn tick(&mut self, proxy: &mut TransitProxy, target: SocketAddr, transit_alive: bool, sam: &mut SamDuk) {
        match self.state {
            InitState::WaitingAppAlive => {
                if transit_alive {
                    self.enter(InitState::QueryingIdentity, Duration::from_millis(500), 3);
                    self.send_get_state(proxy, target).await;
                }
            }
            InitState::QueryingIdentity => self.tick_query_identity(proxy, target, transit_alive).await,
            InitState::QueryingSamSlots => self.tick_query_sam_slots(proxy, target, transit_alive, sam).await,
            InitState::Done => {}
        }
    }

    fn enter(&mut self, state: InitState, period: Duration, max_attempts: u32) {
        self.state = state;
        self.budget = AttemptBudget::new(period, max_attempts);
        self.pending = None;
    }

    async fn send_get_state(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        let payload = PayloadBuilder::new().command(Command::GetState).build();
        let rx = proxy.send(target, payload, self.budget.period).await;
        self.budget.record();
        self.pending = Some(rx);
    }

    async fn send_sam_probe(&mut self, proxy: &mut TransitProxy, target: SocketAddr) {
        let payload = PayloadBuilder::new()
            .command(Command::SamTransmit)
            .sam_slot(0)
            .apdu_request(&crate::wire::apdu::is_unlocked())
            .build();
        let rx = proxy.send(target, payload, self.budget.period).await;
        self.budget.record();
        self.pending = Some(rx);
    }

    fn take_response(&mut self) -> Option<Option<TransitFrame>> {
        match self.pending.as_mut() {
            Some(rx) => match rx.try_recv() {
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

    async fn tick_query_identity(&mut self, proxy: &mut TransitProxy, target: SocketAddr, transit_alive: bool) {
        if !transit_alive {
            self.reset();
            return;
        }
        if self.pending.is_none() {
            self.send_get_state(proxy, target).await;
            return;
        }
        match self.take_response() {
            Some(Some(_frame)) => {
                self.enter(InitState::QueryingSamSlots, Duration::from_millis(500), 3);
                self.send_sam_probe(proxy, target).await;
            }
            Some(None) if self.budget.is_exhausted() => self.reset(),
            Some(None) => self.send_get_state(proxy, target).await,
            None => {}
        }
    }

    async fn tick_query_sam_slots(
        &mut self,
        proxy: &mut TransitProxy,
        target: SocketAddr,
        transit_alive: bool,
        sam: &mut SamDuk,
    ) {
        if !transit_alive {
            self.reset();
            return;
        }
        if self.pending.is_none() {
            self.send_sam_probe(proxy, target).await;
            return;
        }
        match self.take_response() {
            Some(Some(frame)) => {
                self.sam_slot_index = frame.payload.find(TagType::SamSlot).and_then(|v| v.first()).copied().or(Some(0));
                if let Some(atr) = frame.payload.find(TagType::Atr) {
                    sam.set_atr(SamAtr(atr.to_vec()));
                }
                self.state = InitState::Done;
                self.pending = None;
            }
            Some(None) if self.budget.is_exhausted() => self.reset(),
            Some(None) => self.send_sam_probe(proxy, target).await,
            None => {}
        }
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
        let endpoint = TcpEndpoint::bind("init-test", 0, CancellationToken::new()).await.expect("bind");
        let mut proxy = TransitProxy::new(endpoint, EventBus::new());
        proxy.open();
        proxy
    }

    #[tokio::test]
    async fn stays_waiting_until_transit_alive() {
        let mut sm = IngenicoReaderInitStateMachine::new();
        let mut proxy = fresh_proxy().await;
        let mut sam = SamDuk::new(0);
        sm.tick(&mut proxy, target(), false, &mut sam).await;
        assert!(!sm.init_status_done());
    }

    #[tokio::test]
    async fn advances_to_querying_identity_once_alive() {
        let mut sm = IngenicoReaderInitStateMachine::new();
        let mut proxy = fresh_proxy().await;
        let mut sam = SamDuk::new(0);
        sm.tick(&mut proxy, target(), true, &mut sam).await;
        assert!(!sm.init_status_done());
        assert!(sm.pending.is_some());
    }

    #[tokio::test]
    async fn losing_liveness_mid_query_resets_to_start() {
        let mut sm = IngenicoReaderInitStateMachine::new();
        let mut proxy = fresh_proxy().await;
        let mut sam = SamDuk::new(0);
        sm.tick(&mut proxy, target(), true, &mut sam).await;
        sm.tick(&mut proxy, target(), false, &mut sam).await;
        assert_eq!(sm.state, InitState::WaitingAppAlive);
    }
}
