// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `TransitController` (component C4, spec §4.4): owns the Transit control
//! loop — periodic checkers (reader init, SAM auth, card-tap controller)
//! ticked in registration order, plus a low-rate heartbeat while connected.

use std::net::SocketAddr;
use std::time::Duration;

use crate::appstate::sam_duk::SamDuk;
use crate::controller::heartbeat::TransitHeartBeatOutputter;
use crate::proxy::transit_proxy::TransitProxy;
use crate::statemachine::{IngenicoReaderInitStateMachine, SamDukAuthStateMachine};
use crate::tapctl::{CardTapController, TapPreconditions};
use crate::wire::frame::TransitFrame;
use crate::wire::tags::Command;
use crate::wire::tlv::PayloadBuilder;

pub struct TransitController {
    reader_init: IngenicoReaderInitStateMachine,
    sam_auth: SamDukAuthStateMachine,
    tap: CardTapController,
    heartbeat: TransitHeartBeatOutputter,
}

impl Default for TransitController {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitController {
    pub fn new() -> Self {
        Self {
            reader_init: IngenicoReaderInitStateMachine::new(),
            sam_auth: SamDukAuthStateMachine::new(),
            tap: CardTapController::new(),
            heartbeat: TransitHeartBeatOutputter::new(),
        }
    }

    pub fn tap_controller(&mut self) -> &mut CardTapController {
        &mut self.tap
    }

    pub fn reader_init(&self) -> &IngenicoReaderInitStateMachine {
        &self.reader_init
    }

    pub fn reset_on_disconnect(&mut self, sam: &mut SamDuk) {
        self.reader_init.reset();
        self.sam_auth.reset_for_reconnect(sam);
    }

    /// Registration order, leaves first (spec §4.10): reader init, SAM auth,
    /// card-tap controller, then the heartbeat outputter.
    pub async fn tick(
        &mut self,
        proxy: &mut TransitProxy,
        target: SocketAddr,
        transit_alive: bool,
        sam: &mut SamDuk,
        maintenance_active: bool,
    ) -> Vec<TransitFrame> {
        let incoming = proxy.tick();

        self.reader_init.tick(proxy, target, transit_alive, sam).await;

        if let Some(slot) = self.reader_init.sam_slot_index() {
            self.sam_auth
                .tick(sam, proxy, target, slot, transit_alive, sam.atr().is_duk_atr())
                .await;
        }

        let pre = TapPreconditions {
            reader_ready: self.reader_init.init_status_done(),
            transit_alive,
            sam_authenticated: sam.is_authenticated(),
            maintenance_active,
        };
        self.tap.tick(proxy, target, pre).await;

        if self.heartbeat.due(transit_alive) {
            let payload = PayloadBuilder::new().command(Command::GetState).build();
            let _ = proxy.send(target, payload, Duration::from_millis(500)).await;
        }

        incoming
    }
}
