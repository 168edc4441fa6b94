// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `IfsfController` (component C4, spec §4.4): owns the IFSF control loop —
//! routes incoming device DTOs, drives `IngenicoIfsfApp` liveness from
//! Diagnosis responses, and emits a low-rate Diagnosis heartbeat.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::appstate::ifsf_app::IngenicoIfsfApp;
use crate::controller::heartbeat::IfsfHeartBeatOutputter;
use crate::proxy::ifsf_proxy::IfsfProxy;
use crate::wire::ifsf::{Diagnosis, IfsfDto};

const HEARTBEAT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

pub struct IfsfController {
    heartbeat: IfsfHeartBeatOutputter,
    pending_diagnosis: Option<oneshot::Receiver<Option<IfsfDto>>>,
}

impl Default for IfsfController {
    fn default() -> Self {
        Self::new()
    }
}

impl IfsfController {
    pub fn new() -> Self {
        Self { heartbeat: IfsfHeartBeatOutputter::new(), pending_diagnosis: None }
    }

    pub async fn tick(
        &mut self,
        proxy: &mut IfsfProxy,
        ifsf_app: &mut IngenicoIfsfApp,
        target: SocketAddr,
        connected: bool,
    ) -> Vec<IfsfDto> {
        let incoming = proxy.tick();

        // Any unsolicited Diagnosis carries the reader's terminal identity.
        for dto in &incoming {
            if let IfsfDto::Diagnosis(d) = dto {
                ifsf_app.on_diagnosis_response();
                ifsf_app.set_terminal_id(d.terminal_id.clone());
            }
        }

        if let Some(rx) = self.pending_diagnosis.as_mut() {
            match rx.try_recv() {
                Ok(Some(IfsfDto::Diagnosis(d))) => {
                    ifsf_app.on_diagnosis_response();
                    ifsf_app.set_terminal_id(d.terminal_id);
                    self.pending_diagnosis = None;
                }
                Ok(_) => self.pending_diagnosis = None,
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => self.pending_diagnosis = None,
            }
        }

        if self.pending_diagnosis.is_none() && self.heartbeat.due(connected) {
            let request_id = proxy.next_request_id();
            let dto = IfsfDto::Diagnosis(Diagnosis { request_id, terminal_id: None, result_code: None });
            let rx = proxy.send(target, dto, HEARTBEAT_RESPONSE_TIMEOUT).await;
            self.pending_diagnosis = Some(rx);
        }

        incoming
    }
}
