// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IFSF protocol proxy (component C3, spec §4.3): same responsibilities as
//! the Transit proxy, keyed by `request_id` instead of a message id byte.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::CoreError;
use crate::net::TcpEndpoint;
use crate::wire::ifsf::{IfsfDto, IfsfFrame, IfsfProtMsg};

struct Outstanding {
    msg: IfsfProtMsg,
    deadline: Instant,
}

pub struct IfsfProxy {
    endpoint: TcpEndpoint,
    outstanding: HashMap<u32, Outstanding>,
    recv_buf: Vec<u8>,
    next_request_id: u32,
    open: bool,
}

impl IfsfProxy {
    pub fn new(endpoint: TcpEndpoint) -> Self {
        Self {
            endpoint,
            outstanding: HashMap::new(),
            recv_buf: Vec::new(),
            next_request_id: 1,
            open: false,
        }
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
        for (_, mut entry) in self.outstanding.drain() {
            if let Some(reply) = entry.msg.reply.take() {
                let _ = reply.send(None);
            }
        }
    }

    pub fn endpoint(&self) -> &TcpEndpoint {
        &self.endpoint
    }

    pub fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Send a DTO. Fire-and-forget DTOs (`DeviceOutput`) resolve their
    /// receiver immediately with `None` once the write succeeds — there is
    /// no correlated response to wait for, only a transport-level ack.
    pub async fn send(
        &mut self,
        target: SocketAddr,
        dto: IfsfDto,
        response_timeout: Duration,
    ) -> oneshot::Receiver<Option<IfsfDto>> {
        let request_id = dto.request_id();
        let expects_response = dto.expects_response();
        let (tx, rx) = oneshot::channel();

        let xml = match dto.encode_xml() {
            Ok(xml) => xml,
            Err(e) => {
                tracing::warn!(request_id, err = %e, "ifsf encode failed");
                let _ = tx.send(None);
                return rx;
            }
        };
        let frame_bytes = IfsfFrame::encode(&xml);

        if let Err(e) = self.endpoint.output(&frame_bytes, target).await {
            tracing::warn!(request_id, err = %e, "ifsf send failed");
            let _ = tx.send(None);
            return rx;
        }

        if expects_response {
            let msg = IfsfProtMsg { request_id, dto, reply: Some(tx) };
            let deadline = Instant::now() + response_timeout;
            self.outstanding.insert(request_id, Outstanding { msg, deadline });
        } else {
            let _ = tx.send(None);
        }

        rx
    }

    pub fn reset_outstanding(&mut self) {
        for (_, mut entry) in self.outstanding.drain() {
            if let Some(reply) = entry.msg.reply.take() {
                let _ = reply.send(None);
            }
        }
    }

    /// Drive one master-loop tick, returning server-initiated DTOs that did
    /// not correlate to an outstanding request.
    pub fn tick(&mut self) -> Vec<IfsfDto> {
        if !self.open {
            return Vec::new();
        }

        self.recv_buf.extend(self.endpoint.drain_inbound());

        let mut incoming = Vec::new();
        loop {
            match IfsfFrame::try_decode(&self.recv_buf) {
                Ok(Some((xml, consumed))) => {
                    self.recv_buf.drain(..consumed);
                    match IfsfDto::decode_xml(&xml) {
                        Ok(dto) => self.route_dto(dto, &mut incoming),
                        Err(e) => tracing::warn!(err = %e, "dropping unparseable ifsf dto"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(err = %e, "dropping unparseable ifsf buffer");
                    self.recv_buf.clear();
                    break;
                }
            }
        }

        self.expire_orphans();
        incoming
    }

    fn route_dto(&mut self, dto: IfsfDto, incoming: &mut Vec<IfsfDto>) {
        let request_id = dto.request_id();
        if let Some(mut entry) = self.outstanding.remove(&request_id) {
            if let Some(reply) = entry.msg.reply.take() {
                let _ = reply.send(Some(dto));
            }
        } else {
            incoming.push(dto);
        }
    }

    fn expire_orphans(&mut self) {
        let now = Instant::now();
        let expired: Vec<u32> =
            self.outstanding.iter().filter(|(_, e)| e.deadline <= now).map(|(id, _)| *id).collect();
        for id in expired {
            if let Some(mut entry) = self.outstanding.remove(&id) {
                if let Some(reply) = entry.msg.reply.take() {
                    let _ = reply.send(None);
                }
            }
        }
    }
}

/// Resolve a pending `send()` result, converting a timeout into
/// `CoreError::ResponseTimeout`.
pub async fn await_response(rx: oneshot::Receiver<Option<IfsfDto>>) -> Result<IfsfDto, CoreError> {
    match rx.await {
        Ok(Some(dto)) => Ok(dto),
        Ok(None) => Err(CoreError::ResponseTimeout),
        Err(_) => Err(CoreError::ResponseTimeout),
    }
}
