// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Card-read orchestrator (spec §4.9): arms a card-tap request for the
//! requested schema, then runs [`EmvCardDetectorOpt`] followed by
//! [`DukCardReaderOpt`] once a card is tapped.

use std::time::Duration;

use uuid::Uuid;

use crate::error::{CoreError, NotReadyReason};
use crate::masterloop::MasterLoopHandle;
use crate::opt::{self, CardDuk, DukCardReaderOpt, EmvCardDetectorOpt, ReadSchema};
use crate::orchestrator::session::SessionStatus;
use crate::tapctl::{CardDetectedData, CardTapSource, CardTappingRequest};

/// Starts a card-read session for the named schema (`"BASIC"` or `"FULL"`,
/// spec §6). Arms a one-shot tap request and a wall-clock timeout guard;
/// returns the new session id.
pub async fn start_card_read(
    handle: MasterLoopHandle,
    schema_name: &str,
    timeout_ms: u64,
) -> Result<Uuid, CoreError> {
    let schema = ReadSchema::from_boundary_name(schema_name)
        .ok_or_else(|| CoreError::InvalidResponse(format!("unknown read schema: {schema_name}")))?;
    if timeout_ms < 1000 {
        return Err(CoreError::InvalidResponse("timeout_ms must be >= 1000".to_owned()));
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

    let session_id = handle.sessions().create();
    handle.sessions().set_status(session_id, SessionStatus::WaitingForCard);

    let detected_handle = handle.clone();
    let error_handle = handle.clone();

    let request = CardTappingRequest::new(
        CardTapSource::CardRead,
        move |data: CardDetectedData| {
            let handle = detected_handle.clone();
            tokio::spawn(run_order(handle, session_id, schema, data));
        },
        move || {
            error_handle.sessions().fail(session_id, CoreError::Cancelled.sanitized_message());
            error_handle.clear_card_tapping_request(CardTapSource::CardRead);
        },
    );
    if handle.set_card_tapping_request(request).is_err() {
        handle.sessions().fail(session_id, CoreError::CardTappingUnavailable.sanitized_message());
        return Err(CoreError::CardTappingUnavailable);
    }

    tokio::spawn(expire_if_unclaimed(handle, session_id, Duration::from_millis(timeout_ms)));

    Ok(session_id)
}

/// Cancels an in-flight card-read session: stops tapping and fails the
/// session with the same sanitized message a tap-controller cancellation
/// would produce. Returns `false` if the session was not awaiting a card
/// (already completed, failed, or expired) — spec §6 `cancelCardRead -> bool`.
pub fn cancel(handle: &MasterLoopHandle, session_id: Uuid) -> bool {
    let Some(snapshot) = handle.sessions().get_status(session_id) else {
        return false;
    };
    if snapshot.status != SessionStatus::WaitingForCard {
        return false;
    }
    handle.stop_card_tapping(true);
    handle.clear_card_tapping_request(CardTapSource::CardRead);
    handle.sessions().fail(session_id, CoreError::Cancelled.sanitized_message());
    true
}

async fn expire_if_unclaimed(handle: MasterLoopHandle, session_id: Uuid, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(snapshot) = handle.sessions().get_status(session_id) {
        if snapshot.status == SessionStatus::WaitingForCard {
            handle.sessions().fail(session_id, CoreError::Timeout.sanitized_message());
            handle.clear_card_tapping_request(CardTapSource::CardRead);
        }
    }
}

async fn run_order(handle: MasterLoopHandle, session_id: Uuid, schema: ReadSchema, _data: CardDetectedData) {
    handle.acknowledge_detection_consumed();
    handle.sessions().set_status(session_id, SessionStatus::Processing);

    let detector = EmvCardDetectorOpt::new(handle.clone());
    if let Err(err) = opt::execute(detector).await.into_result() {
        handle.stop_card_tapping(true);
        handle.clear_card_tapping_request(CardTapSource::CardRead);
        handle.sessions().fail(session_id, err.sanitized_message());
        return;
    }

    let snapshot = handle.snapshot().await;
    let (Some(slot), Some(cipher)) = (snapshot.sam_slot_index, snapshot.sam_cipher) else {
        handle.stop_card_tapping(true);
        handle.clear_card_tapping_request(CardTapSource::CardRead);
        handle
            .sessions()
            .fail(session_id, CoreError::NotReady(NotReadyReason::SamNotAuthenticated).sanitized_message());
        return;
    };

    let reader = DukCardReaderOpt::new(handle.clone(), slot, cipher, schema);
    let result = opt::execute(reader).await.into_result();
    handle.stop_card_tapping(true);
    handle.clear_card_tapping_request(CardTapSource::CardRead);

    match result {
        Ok(duk) => handle.sessions().complete(session_id, Some(duk_presence_payload(&duk))),
        Err(err) => handle.sessions().fail(session_id, err.sanitized_message()),
    }
}

/// Surfaces file presence rather than raw (even decrypted) DUK bytes at the
/// session boundary; the byte contents remain an internal detail between the
/// reader opt and whatever collaborator parses them downstream.
fn duk_presence_payload(duk: &CardDuk) -> serde_json::Value {
    serde_json::json!({
        "cardInfo": duk.card_info.is_some(),
        "cardHolderInfo": duk.card_holder_info.is_some(),
        "valueEp": duk.value_ep.is_some(),
        "tickets": duk.tickets.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_payload_reflects_which_files_were_read() {
        let duk = CardDuk { card_info: Some(vec![1]), ..Default::default() };
        let payload = duk_presence_payload(&duk);
        assert_eq!(payload["cardInfo"], true);
        assert_eq!(payload["tickets"], false);
    }
}
