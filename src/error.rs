// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reasons a precondition check can fail (spec §4.9 "NotReady" branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotReadyReason {
    SamNotDetected,
    SamAtrNotDuk,
    SamNotAuthenticated,
    SamAlreadyUnlocked,
    ReaderNotInit,
    TransitNotAlive,
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SamNotDetected => "SAM not detected",
            Self::SamAtrNotDuk => "SAM ATR is not a DUK ATR",
            Self::SamNotAuthenticated => "SAM not authenticated",
            Self::SamAlreadyUnlocked => "SAM already unlocked",
            Self::ReaderNotInit => "reader not initialized",
            Self::TransitNotAlive => "Transit app not alive",
        };
        f.write_str(s)
    }
}

/// Closed set of error kinds that can cross a component boundary (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    InvalidPinFormat,
    NotReady(NotReadyReason),
    ResponseTimeout,
    InvalidResponse(String),
    ResponseCodeError(u8),
    MissingTlvTag(u8),
    ApduStatusWordError,
    CipherError(String),
    NotADukCard,
    CardReadingError(String),
    Cancelled,
    Timeout,
    OptTimeout,
    CardTappingUnavailable,
}

impl CoreError {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::InvalidPinFormat => "INVALID_PIN_FORMAT",
            Self::NotReady(_) => "NOT_READY",
            Self::ResponseTimeout => "RESPONSE_TIMEOUT",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::ResponseCodeError(_) => "RESPONSE_CODE_ERROR",
            Self::MissingTlvTag(_) => "MISSING_TLV_TAG",
            Self::ApduStatusWordError => "APDU_STATUS_WORD_ERROR",
            Self::CipherError(_) => "CIPHER_ERROR",
            Self::NotADukCard => "NOT_A_DUK_CARD",
            Self::CardReadingError(_) => "CARD_READING_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::OptTimeout => "OPT_TIMEOUT",
            Self::CardTappingUnavailable => "CARD_TAPPING_UNAVAILABLE",
        }
    }

    /// Message safe to surface through the session snapshot (spec §7:
    /// orchestrators never raise the underlying error to the REST boundary).
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::InvalidPinFormat => "invalid PIN format".to_owned(),
            Self::NotReady(reason) => format!("not ready: {reason}"),
            Self::ResponseTimeout => "response timeout".to_owned(),
            Self::InvalidResponse(desc) => format!("invalid response: {desc}"),
            Self::ResponseCodeError(code) => format!("response code error: 0x{code:02X}"),
            Self::MissingTlvTag(tag) => format!("missing TLV tag: 0x{tag:02X}"),
            Self::ApduStatusWordError => "ApduResponse status word error".to_owned(),
            Self::CipherError(desc) => format!("cipher error: {desc}"),
            Self::NotADukCard => "EMV card detected".to_owned(),
            Self::CardReadingError(desc) => format!("card reading error: {desc}"),
            Self::Cancelled => "Cancelled by user".to_owned(),
            Self::Timeout => "Timeout waiting for card tap".to_owned(),
            Self::OptTimeout => "Timeout waiting for operation response".to_owned(),
            Self::CardTappingUnavailable => "card tapping unavailable".to_owned(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_code(), self.sanitized_message())
    }
}

impl std::error::Error for CoreError {}

/// Wire-shape error envelope for the orchestrator boundary (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        Self { code: err.as_code().to_owned(), message: err.sanitized_message() }
    }
}
