// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transit protocol proxy (component C3, spec §4.3): frame reassembly,
//! outstanding-request table, message-id synchronization, open/close.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::Wrapping;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::appstate::transit_app::TransitAppEvent;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::net::TcpEndpoint;
use crate::wire::frame::{Direction, TransitFrame, TransitProtMsg};
use crate::wire::tlv::Payload;

/// How long after a forced reset an unmatched response id is still treated
/// as a stale reply from before the reset (rather than a protocol bug).
const RESET_RESYNC_WINDOW: Duration = Duration::from_secs(5);

pub struct TransitProxy {
    endpoint: TcpEndpoint,
    outstanding: HashMap<u8, TransitProtMsg>,
    recv_buf: Vec<u8>,
    next_message_id: Wrapping<u8>,
    last_reset_at: Option<Instant>,
    app_events: EventBus<TransitAppEvent>,
    open: bool,
}

impl TransitProxy {
    pub fn new(endpoint: TcpEndpoint, app_events: EventBus<TransitAppEvent>) -> Self {
        Self {
            endpoint,
            outstanding: HashMap::new(),
            recv_buf: Vec::new(),
            next_message_id: Wrapping(0),
            last_reset_at: None,
            app_events,
            open: false,
        }
    }

    /// `open()` enables processing (spec §4.3 "Open/close").
    pub fn open(&mut self) {
        self.open = true;
    }

    /// `close()` drains the table by synthesizing timeout callbacks.
    pub fn close(&mut self) {
        self.open = false;
        for (_, mut msg) in self.outstanding.drain() {
            msg.deliver(None);
        }
    }

    pub fn endpoint(&self) -> &TcpEndpoint {
        &self.endpoint
    }

    /// Send one Transit request, inserting it into the outstanding-request
    /// table. Returns a receiver that resolves with `Some(frame)` on a
    /// matched response or `None` on expiry (proxy-level timeout, spec §5).
    pub async fn send(
        &mut self,
        target: SocketAddr,
        payload: Payload,
        response_timeout: Duration,
    ) -> oneshot::Receiver<Option<TransitFrame>> {
        let message_id = self.next_message_id.0;
        self.next_message_id += Wrapping(1);

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + response_timeout;
        let msg = TransitProtMsg::new_request(message_id, payload, target, deadline, tx);
        let frame_bytes = msg.to_frame().encode();

        self.outstanding.insert(message_id, msg);

        if let Err(e) = self.endpoint.output(&frame_bytes, target).await {
            tracing::warn!(message_id, err = %e, "transit send failed");
            if let Some(mut msg) = self.outstanding.remove(&message_id) {
                msg.deliver(None);
            }
        }

        rx
    }

    /// Force the outstanding table empty without a write (used when the
    /// transport itself resets, e.g. on disconnect). Marks the reset time
    /// so a subsequent unmatched response id is recognized as stale rather
    /// than logged as a protocol bug.
    pub fn reset_outstanding(&mut self) {
        for (_, mut msg) in self.outstanding.drain() {
            msg.deliver(None);
        }
        self.last_reset_at = Some(Instant::now());
    }

    /// Drive one master-loop tick: reassemble frames off the socket,
    /// dispatch responses, expire orphans, and return server-initiated
    /// request frames for the controller to route to its processors.
    pub fn tick(&mut self) -> Vec<TransitFrame> {
        if !self.open {
            return Vec::new();
        }

        self.recv_buf.extend(self.endpoint.drain_inbound());

        let mut incoming = Vec::new();
        loop {
            match TransitFrame::try_decode(&self.recv_buf) {
                Ok(Some((frame, consumed))) => {
                    self.recv_buf.drain(..consumed);
                    self.route_frame(frame, &mut incoming);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(err = %e, "dropping unparseable transit buffer");
                    self.recv_buf.clear();
                    break;
                }
            }
        }

        self.expire_orphans();
        incoming
    }

    fn route_frame(&mut self, frame: TransitFrame, incoming: &mut Vec<TransitFrame>) {
        match frame.direction {
            Direction::Request => incoming.push(frame),
            Direction::Response => {
                if let Some(mut msg) = self.outstanding.remove(&frame.message_id) {
                    msg.deliver(Some(frame));
                } else {
                    self.handle_unmatched_response(frame);
                }
            }
        }
    }

    fn handle_unmatched_response(&mut self, frame: TransitFrame) {
        let recently_reset = self
            .last_reset_at
            .map(|t| t.elapsed() < RESET_RESYNC_WINDOW)
            .unwrap_or(false);

        if recently_reset {
            self.app_events.publish(TransitAppEvent::MessageIdSyncedAfterError {
                message_id: frame.message_id,
            });
        } else {
            tracing::warn!(message_id = frame.message_id, "unmatched transit response");
        }
    }

    fn expire_orphans(&mut self) {
        let now = Instant::now();
        let expired: Vec<u8> = self
            .outstanding
            .iter()
            .filter(|(_, msg)| msg.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(mut msg) = self.outstanding.remove(&id) {
                msg.deliver(None);
            }
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

/// Resolve a pending `send()` result, converting a timeout (`None`) into
/// `CoreError::ResponseTimeout`. Shared by every OPT.
pub async fn await_response(
    rx: oneshot::Receiver<Option<TransitFrame>>,
) -> Result<TransitFrame, CoreError> {
    match rx.await {
        Ok(Some(frame)) => Ok(frame),
        Ok(None) => Err(CoreError::ResponseTimeout),
        Err(_) => Err(CoreError::ResponseTimeout),
    }
}
