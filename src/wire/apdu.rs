// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! APDU factory: pure functions producing opaque command byte blocks, plus
//! response-side predicates (spec §4.1). APDUs are opaque to every layer
//! above the codec; the instruction bytes below exist only so the factory
//! functions are distinguishable in traces.

/// Response APDU, opaque except for its status word and raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    bytes: Vec<u8>,
}

impl ApduResponse {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Trailing two bytes, ISO 7816-4 status word (`0x9000` = success).
    pub fn status_word(&self) -> Option<u16> {
        if self.bytes.len() < 2 {
            return None;
        }
        let n = self.bytes.len();
        Some(u16::from_be_bytes([self.bytes[n - 2], self.bytes[n - 1]]))
    }

    pub fn status_word_success(&self) -> bool {
        self.status_word() == Some(0x9000)
    }

    /// Application data, excluding the trailing status word.
    pub fn data(&self) -> &[u8] {
        if self.bytes.len() < 2 {
            &[]
        } else {
            &self.bytes[..self.bytes.len() - 2]
        }
    }

    /// Both the SAM relay status word and the DESFire-internal status
    /// (first byte of `data`, for files that echo one) must be success.
    pub fn sam_and_desfire_status_ok(&self) -> bool {
        if !self.status_word_success() {
            return false;
        }
        matches!(self.data().first(), Some(0x00) | None)
    }
}

const INS_VERIFY_PIN3: u8 = 0x20;
const INS_READ_CARD_INFO: u8 = 0xB0;
const INS_READ_CARD_HOLDER_INFO: u8 = 0xB1;
const INS_READ_VALUE_EP: u8 = 0xB2;
const INS_READ_ALL_TICKETS: u8 = 0xB3;
const INS_IS_UNLOCKED: u8 = 0x1A;

fn wrap(ins: u8, encrypted_payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + encrypted_payload.len());
    out.push(0x80); // CLA
    out.push(ins);
    out.push(0x00); // P1
    out.push(0x00); // P2
    out.push(encrypted_payload.len() as u8);
    out.extend_from_slice(encrypted_payload);
    out
}

pub fn verify_pin3(encrypted: &[u8]) -> Vec<u8> {
    wrap(INS_VERIFY_PIN3, encrypted)
}

pub fn read_card_info_file(encrypted: &[u8]) -> Vec<u8> {
    wrap(INS_READ_CARD_INFO, encrypted)
}

pub fn read_card_holder_info_file(encrypted: &[u8]) -> Vec<u8> {
    wrap(INS_READ_CARD_HOLDER_INFO, encrypted)
}

pub fn read_value_ep_file(encrypted: &[u8]) -> Vec<u8> {
    wrap(INS_READ_VALUE_EP, encrypted)
}

pub fn read_all_tickets(encrypted: &[u8]) -> Vec<u8> {
    wrap(INS_READ_ALL_TICKETS, encrypted)
}

pub fn is_unlocked() -> Vec<u8> {
    wrap(INS_IS_UNLOCKED, &[])
}

/// PPSE-select APDU used by `EmvCardDetectorOpt` to probe for an EMV card.
pub fn select_ppse() -> Vec<u8> {
    const PPSE: &[u8] = b"2PAY.SYS.DDF01";
    let mut out = vec![0x00, 0xA4, 0x04, 0x00, PPSE.len() as u8];
    out.extend_from_slice(PPSE);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_word_success_recognizes_9000() {
        let resp = ApduResponse::from_bytes(vec![0x01, 0x02, 0x90, 0x00]);
        assert!(resp.status_word_success());
        assert_eq!(resp.data(), &[0x01, 0x02]);
    }

    #[test]
    fn status_word_failure_is_not_success() {
        let resp = ApduResponse::from_bytes(vec![0x6A, 0x82]);
        assert!(!resp.status_word_success());
        assert!(resp.data().is_empty());
    }

    #[test]
    fn sam_and_desfire_status_ok_checks_both_layers() {
        let ok = ApduResponse::from_bytes(vec![0x00, 0x90, 0x00]);
        assert!(ok.sam_and_desfire_status_ok());

        let desfire_fail = ApduResponse::from_bytes(vec![0x01, 0x90, 0x00]);
        assert!(!desfire_fail.sam_and_desfire_status_ok());

        let sam_fail = ApduResponse::from_bytes(vec![0x00, 0x6A, 0x82]);
        assert!(!sam_fail.sam_and_desfire_status_ok());
    }

    #[test]
    fn verify_pin3_wraps_encrypted_payload() {
        let apdu = verify_pin3(&[0xAA, 0xBB]);
        assert_eq!(apdu[1], INS_VERIFY_PIN3);
        assert_eq!(&apdu[5..], &[0xAA, 0xBB]);
    }
}
