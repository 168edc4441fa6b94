// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `SamDukAuthStateMachine` (component C6, spec §4.6): runs a
//! challenge/response authentication with the SAM, deriving the session
//! cipher on success. States progress monotonically; failure resets to
//! `NOT_STARTED` only after the Transit app disconnects and reconnects.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::appstate::sam_duk::{AuthProcessState, SamDuk};
use crate::proxy::transit_proxy::TransitProxy;
use crate::wire::apdu::{is_unlocked, ApduResponse};
use crate::wire::cipher::SessionCipher;
use crate::wire::frame::TransitFrame;
use crate::wire::tags::Command;
use crate::wire::tlv::PayloadBuilder;

const AUTH_ATTEMPT_PERIOD: Duration = Duration::from_millis(1000);
const AUTH_MAX_ATTEMPTS: u32 = 3;

pub struct SamDukAuthStateMachine {
    pending: Option<oneshot::Receiver<Option<TransitFrame>>>,
    attempts_used: u32,
}

impl Default for SamDukAuthStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SamDukAuthStateMachine {
    pub fn new() -> Self {
        Self { pending: None, attempts_used: 0 }
    }

    /// Called when the Transit app disconnects; per spec §4.6, auth failure
    /// resets to `NOT_STARTED` only on this transition, never spontaneously.
    pub fn reset_for_reconnect(&mut self, sam: &mut SamDuk) {
        self.pending = None;
        self.attempts_used = 0;
        sam.reset_for_reconnect();
    }

    pub async fn tick(
        &mut self,
        sam: &mut SamDuk,
        proxy: &mut TransitProxy,
        target: SocketAddr,
        slot_index: u8,
        transit_alive: bool,
        sam_atr_is_duk: bool,
    ) {
        if !transit_alive || !sam_atr_is_duk {
            return;
        }
        if sam.is_authenticated() || sam.auth_state() == AuthProcessState::FinishedFail {
            return;
        }

        if self.pending.is_none() {
            sam.set_auth_state(AuthProcessState::Running);
            self.send_challenge(sam, proxy, target, slot_index).await;
            return;
        }

        let Some(response) = self.take_response() else { return };
        match response {
            Some(frame) => {
                let apdu_bytes = frame.payload.apdu_response().unwrap_or_default().to_vec();
                let apdu = ApduResponse::from_bytes(apdu_bytes);
                if apdu.status_word_success() && apdu.data().len() >= 32 {
                    let key = &apdu.data()[..16];
                    let iv = &apdu.data()[16..32];
                    match SessionCipher::new(key, iv) {
                        Ok(cipher) => {
                            sam.set_auth_state(AuthProcessState::FinishedOk);
                            sam.install_session_cipher(cipher);
                        }
                        Err(_) => sam.set_auth_state(AuthProcessState::FinishedFail),
                    }
                } else if self.attempts_used >= AUTH_MAX_ATTEMPTS {
                    sam.set_auth_state(AuthProcessState::FinishedFail);
                } else {
                    self.send_challenge(sam, proxy, target, slot_index).await;
                }
            }
            None => {
                if self.attempts_used >= AUTH_MAX_ATTEMPTS {
                    sam.set_auth_state(AuthProcessState::FinishedFail);
                } else {
                    self.send_challenge(sam, proxy, target, slot_index).await;
                }
            }
        }
    }

    async fn send_challenge(&mut self, sam: &SamDuk, proxy: &mut TransitProxy, target: SocketAddr, slot_index: u8) {
        let _ = sam;
        let payload = PayloadBuilder::new()
            .command(Command::SamTransmit)
            .sam_slot(slot_index)
            .apdu_request(&is_unlocked())
            .build();
        let rx = proxy.send(target, payload, AUTH_ATTEMPT_PERIOD).await;
        self.attempts_used += 1;
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
        let endpoint = TcpEndpoint::bind("auth-test", 0, CancellationToken::new()).await.expect("bind");
        let mut proxy = TransitProxy::new(endpoint, EventBus::new());
        proxy.open();
        proxy
    }

    #[tokio::test]
    async fn does_not_start_without_duk_atr() {
        let mut sm = SamDukAuthStateMachine::new();
        let mut sam = SamDuk::new(0);
        let mut proxy = fresh_proxy().await;
        sm.tick(&mut sam, &mut proxy, target(), 0, true, false).await;
        assert_eq!(sam.auth_state(), AuthProcessState::NotStarted);
    }

    #[tokio::test]
    async fn begins_running_once_duk_and_alive() {
        let mut sm = SamDukAuthStateMachine::new();
        let mut sam = SamDuk::new(0);
        let mut proxy = fresh_proxy().await;
        sm.tick(&mut sam, &mut proxy, target(), 0, true, true).await;
        assert_eq!(sam.auth_state(), AuthProcessState::Running);
    }

    #[tokio::test]
    async fn reset_for_reconnect_clears_failed_state() {
        let mut sm = SamDukAuthStateMachine::new();
        let mut sam = SamDuk::new(0);
        sam.set_auth_state(AuthProcessState::FinishedFail);
        sm.reset_for_reconnect(&mut sam);
        assert_eq!(sam.auth_state(), AuthProcessState::NotStarted);
    }
}
