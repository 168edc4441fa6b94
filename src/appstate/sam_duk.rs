// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `SamDuk` (spec §3): models the Secure Access Module.

use crate::events::EventBus;
use crate::wire::cipher::SessionCipher;

/// Authentication process state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProcessState {
    NotStarted,
    Running,
    FinishedOk,
    FinishedFail,
}

/// SAM unlock status (spec §3). `Completed` is terminal for the session
/// lifetime — once reached it is never reset except by a fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStatus {
    Unknown,
    NotUnlocked,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamDukEvent {
    AuthStateChanged { state: AuthProcessState },
    UnlockStatusChanged { status: UnlockStatus },
    AtrChanged { is_duk_atr: bool },
}

/// The SAM's Answer-To-Reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SamAtr(pub Vec<u8>);

impl SamAtr {
    /// DUK SAMs report a historical-bytes prefix of `0x44 0x55 0x4B` ("DUK"
    /// in ASCII) in their ATR; any other prefix is a non-DUK SAM.
    pub fn is_duk_atr(&self) -> bool {
        self.0.starts_with(b"DUK")
    }
}

pub struct SamDuk {
    slot_index: u8,
    atr: SamAtr,
    auth_state: AuthProcessState,
    session_cipher: Option<SessionCipher>,
    unlock_status: UnlockStatus,
    events: EventBus<SamDukEvent>,
}

impl SamDuk {
    pub fn new(slot_index: u8) -> Self {
        Self {
            slot_index,
            atr: SamAtr::default(),
            auth_state: AuthProcessState::NotStarted,
            session_cipher: None,
            unlock_status: UnlockStatus::Unknown,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> EventBus<SamDukEvent> {
        self.events.clone()
    }

    pub fn slot_index(&self) -> u8 {
        self.slot_index
    }

    pub fn atr(&self) -> &SamAtr {
        &self.atr
    }

    pub fn set_atr(&mut self, atr: SamAtr) {
        let was_duk = self.atr.is_duk_atr();
        let is_duk = atr.is_duk_atr();
        self.atr = atr;
        if was_duk != is_duk {
            self.events.publish(SamDukEvent::AtrChanged { is_duk_atr: is_duk });
        }
    }

    pub fn auth_state(&self) -> AuthProcessState {
        self.auth_state
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state == AuthProcessState::FinishedOk
    }

    pub fn is_process_state_finished(&self) -> bool {
        matches!(self.auth_state, AuthProcessState::FinishedOk | AuthProcessState::FinishedFail)
    }

    pub fn set_auth_state(&mut self, state: AuthProcessState) {
        if self.auth_state == state {
            return;
        }
        self.auth_state = state;
        self.events.publish(SamDukEvent::AuthStateChanged { state });
    }

    /// `auth.is_authenticated ⇒ session_cipher != None` (spec §3 invariant).
    /// Only callable once auth has finished OK.
    pub fn install_session_cipher(&mut self, cipher: SessionCipher) {
        debug_assert!(self.is_authenticated(), "session cipher installed before auth completed");
        self.session_cipher = Some(cipher);
    }

    pub fn session_cipher(&self) -> Option<&SessionCipher> {
        self.session_cipher.as_ref()
    }

    pub fn unlock_status(&self) -> UnlockStatus {
        self.unlock_status
    }

    /// `unlock_status = Completed` is terminal for the session lifetime; a
    /// caller attempting to move away from `Completed` is a programming
    /// error, not a protocol event, so it is silently ignored rather than
    /// panicking (mirrors the other setters' defensive comparisons).
    pub fn set_unlock_status(&mut self, status: UnlockStatus) {
        if self.unlock_status == UnlockStatus::Completed || self.unlock_status == status {
            return;
        }
        self.unlock_status = status;
        self.events.publish(SamDukEvent::UnlockStatusChanged { status });
    }

    /// Reset to pre-auth state. Only valid after the Transit app has
    /// disconnected and reconnected (spec §4.6): failure resets to
    /// `NotStarted` only on that transition, never spontaneously.
    pub fn reset_for_reconnect(&mut self) {
        self.set_auth_state(AuthProcessState::NotStarted);
        self.session_cipher = None;
        if self.unlock_status != UnlockStatus::Completed {
            self.set_unlock_status(UnlockStatus::Unknown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duk_atr_prefix_is_recognized() {
        let atr = SamAtr(b"DUK-2024-SAM-01".to_vec());
        assert!(atr.is_duk_atr());
        let not_duk = SamAtr(b"EMV-GENERIC".to_vec());
        assert!(!not_duk.is_duk_atr());
    }

    #[test]
    fn unlock_status_completed_is_terminal() {
        let mut sam = SamDuk::new(1);
        sam.set_unlock_status(UnlockStatus::NotUnlocked);
        sam.set_unlock_status(UnlockStatus::Completed);
        sam.set_unlock_status(UnlockStatus::NotUnlocked);
        assert_eq!(sam.unlock_status(), UnlockStatus::Completed);
    }

    #[test]
    fn reset_for_reconnect_clears_cipher_but_preserves_completed_unlock() {
        let mut sam = SamDuk::new(1);
        sam.set_auth_state(AuthProcessState::FinishedOk);
        sam.install_session_cipher(SessionCipher::new(&[0u8; 16], &[0u8; 16]).expect("cipher"));
        sam.set_unlock_status(UnlockStatus::Completed);

        sam.reset_for_reconnect();

        assert_eq!(sam.auth_state(), AuthProcessState::NotStarted);
        assert!(sam.session_cipher().is_none());
        assert_eq!(sam.unlock_status(), UnlockStatus::Completed);
    }

    #[test]
    fn is_authenticated_only_true_when_finished_ok() {
        let mut sam = SamDuk::new(1);
        assert!(!sam.is_authenticated());
        sam.set_auth_state(AuthProcessState::Running);
        assert!(!sam.is_authenticated());
        sam.set_auth_state(AuthProcessState::FinishedOk);
        assert!(sam.is_authenticated());
    }
}
