// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SAM-unlock orchestrator (spec §4.9): validates the PIN and preconditions,
//! registers a card-tap request, then hands the detected card off to
//! [`SamVerifyPinOpt`] once tapped.

use uuid::Uuid;

use crate::error::{CoreError, NotReadyReason};
use crate::masterloop::MasterLoopHandle;
use crate::opt::{self, SamVerifyPinOpt};
use crate::orchestrator::session::SessionStatus;
use crate::tapctl::{CardDetectedData, CardTapSource, CardTappingRequest};

fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Starts a SAM-unlock session: validates inputs and current preconditions,
/// then arms a one-shot card-tap request. Returns the new session id.
pub async fn start_unlock(handle: MasterLoopHandle, pin: String) -> Result<Uuid, CoreError> {
    if !is_valid_pin(&pin) {
        return Err(CoreError::InvalidPinFormat);
    }

    let snapshot = handle.snapshot().await;
    if !snapshot.transit_alive {
        return Err(CoreError::NotReady(NotReadyReason::TransitNotAlive));
    }
    if !snapshot.reader_ready {
        return Err(CoreError::NotReady(NotReadyReason::ReaderNotInit));
    }
    if snapshot.sam_slot_index.is_none() {
        return Err(CoreError::NotReady(NotReadyReason::SamNotDetected));
    }
    if !snapshot.is_duk_atr {
        return Err(CoreError::NotReady(NotReadyReason::SamAtrNotDuk));
    }
    if !snapshot.sam_authenticated {
        return Err(CoreError::NotReady(NotReadyReason::SamNotAuthenticated));
    }
    if matches!(snapshot.sam_unlock_status, crate::appstate::sam_duk::UnlockStatus::Completed) {
        return Err(CoreError::NotReady(NotReadyReason::SamAlreadyUnlocked));
    }

    let session_id = handle.sessions().create();
    handle.sessions().set_status(session_id, SessionStatus::WaitingForCard);

    let detected_handle = handle.clone();
    let detected_pin = pin.clone();
    let error_handle = handle.clone();

    let request = CardTappingRequest::new(
        CardTapSource::SamUnlock,
        move |data: CardDetectedData| {
            let handle = detected_handle.clone();
            let pin = detected_pin.clone();
            tokio::spawn(run_order(handle, session_id, pin, data));
        },
        move || {
            error_handle.sessions().fail(session_id, CoreError::Cancelled.sanitized_message());
            error_handle.clear_card_tapping_request(CardTapSource::SamUnlock);
        },
    );
    if handle.set_card_tapping_request(request).is_err() {
        handle.sessions().fail(session_id, CoreError::CardTappingUnavailable.sanitized_message());
        return Err(CoreError::CardTappingUnavailable);
    }

    Ok(session_id)
}

/// Runs once a card has been tapped for an armed unlock session: stops
/// tapping, re-verifies every precondition against the freshest snapshot
/// (spec §4.9 step 4 — nothing may have changed while waiting for the tap),
/// then drives `SamVerifyPinOpt` to completion.
async fn run_order(handle: MasterLoopHandle, session_id: Uuid, pin: String, data: CardDetectedData) {
    handle.stop_card_tapping(true);
    handle.clear_card_tapping_request(CardTapSource::SamUnlock);
    handle.acknowledge_detection_consumed();
    handle.sessions().set_status(session_id, SessionStatus::Processing);

    if !is_valid_pin(&pin) {
        handle.sessions().fail(session_id, CoreError::InvalidPinFormat.sanitized_message());
        return;
    }

    let snapshot = handle.snapshot().await;
    if !snapshot.reader_ready {
        handle
            .sessions()
            .fail(session_id, CoreError::NotReady(NotReadyReason::ReaderNotInit).sanitized_message());
        return;
    }
    if !snapshot.sam_authenticated {
        handle
            .sessions()
            .fail(session_id, CoreError::NotReady(NotReadyReason::SamNotAuthenticated).sanitized_message());
        return;
    }
    if matches!(snapshot.sam_unlock_status, crate::appstate::sam_duk::UnlockStatus::Completed) {
        handle
            .sessions()
            .fail(session_id, CoreError::NotReady(NotReadyReason::SamAlreadyUnlocked).sanitized_message());
        return;
    }

    let (Some(slot), Some(cipher)) = (snapshot.sam_slot_index, snapshot.sam_cipher) else {
        handle
            .sessions()
            .fail(session_id, CoreError::NotReady(NotReadyReason::SamNotAuthenticated).sanitized_message());
        return;
    };

    let op = SamVerifyPinOpt::new(handle.clone(), slot, cipher, data.uid, pin);
    match opt::execute(op).await.into_result() {
        Ok(status) => {
            let payload = serde_json::json!({ "unlockStatus": format!("{status:?}").to_uppercase() });
            handle.sessions().complete(session_id, Some(payload));
        }
        Err(err) => handle.sessions().fail(session_id, err.sanitized_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_ascii_digits_is_valid() {
        assert!(is_valid_pin("012345"));
        assert!(!is_valid_pin("12345"));
        assert!(!is_valid_pin("12345a"));
    }
}
