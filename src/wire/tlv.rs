// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transit TLV payload builder/parser (component C1, spec §4.1).
//!
//! A payload is an ordered sequence of records `{tag: u8, length: u16 LE,
//! value: bytes}`. Order is preserved because some readers are sensitive to
//! record order within a payload (e.g. `COMMAND` first).

use crate::error::CoreError;
use crate::wire::tags::{Command, LedOperation, ResponseCode, TagType, TerminalStatus};

/// One TLV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvRecord {
    pub tag: u8,
    pub value: Vec<u8>,
}

/// An ordered, append-only TLV payload under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadBuilder {
    records: Vec<TlvRecord>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, tag: TagType, value: Vec<u8>) -> &mut Self {
        self.records.push(TlvRecord { tag: tag.byte(), value });
        self
    }

    pub fn command(&mut self, command: Command) -> &mut Self {
        self.push(TagType::Command, vec![command.code()])
    }

    pub fn sam_slot(&mut self, slot_index: u8) -> &mut Self {
        self.push(TagType::SamSlot, vec![slot_index])
    }

    pub fn apdu_request(&mut self, apdu: &[u8]) -> &mut Self {
        self.push(TagType::ApduRequest, apdu.to_vec())
    }

    pub fn apdu_response(&mut self, apdu: &[u8]) -> &mut Self {
        self.push(TagType::ApduResponse, apdu.to_vec())
    }

    pub fn subject(&mut self, subject: u8) -> &mut Self {
        self.push(TagType::Subject, vec![subject])
    }

    pub fn turn_number(&mut self, turn: u8) -> &mut Self {
        self.push(TagType::TurnNumber, vec![turn])
    }

    pub fn led_number(&mut self, led: u8) -> &mut Self {
        self.push(TagType::LedNumber, vec![led])
    }

    pub fn led_operation(&mut self, op: LedOperation) -> &mut Self {
        self.push(TagType::LedOperation, vec![op.byte()])
    }

    pub fn target_pinpad(&mut self, target: u8) -> &mut Self {
        self.push(TagType::Target, vec![target])
    }

    pub fn status(&mut self, status: TerminalStatus) -> &mut Self {
        self.push(TagType::Status, vec![status.byte()])
    }

    pub fn uid(&mut self, uid: &[u8]) -> &mut Self {
        self.push(TagType::Uid, uid.to_vec())
    }

    pub fn response_code(&mut self, code: ResponseCode) -> &mut Self {
        self.push(TagType::ResponseCode, vec![code.0])
    }

    pub fn build(&self) -> Payload {
        Payload { records: self.records.clone() }
    }
}

/// A built, immutable TLV payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    records: Vec<TlvRecord>,
}

impl Payload {
    /// Encode this payload as `{tag:u8, length:u16 LE, value}*`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for record in &self.records {
            out.push(record.tag);
            out.extend_from_slice(&(record.value.len() as u16).to_le_bytes());
            out.extend_from_slice(&record.value);
        }
        out
    }

    /// Parse a wire-format byte slice into a `Payload`. Unknown tags are
    /// kept verbatim (forward compatible) rather than rejected.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, CoreError> {
        let mut records = Vec::new();
        while !bytes.is_empty() {
            if bytes.len() < 3 {
                return Err(CoreError::InvalidResponse("truncated TLV header".to_owned()));
            }
            let tag = bytes[0];
            let len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
            bytes = &bytes[3..];
            if bytes.len() < len {
                return Err(CoreError::InvalidResponse("truncated TLV value".to_owned()));
            }
            let value = bytes[..len].to_vec();
            bytes = &bytes[len..];
            records.push(TlvRecord { tag, value });
        }
        Ok(Self { records })
    }

    /// First record matching `tag`, if any.
    pub fn find(&self, tag: TagType) -> Option<&[u8]> {
        self.records.iter().find(|r| r.tag == tag.byte()).map(|r| r.value.as_slice())
    }

    pub fn require(&self, tag: TagType) -> Result<&[u8], CoreError> {
        self.find(tag).ok_or(CoreError::MissingTlvTag(tag.byte()))
    }

    pub fn uid(&self) -> Option<&[u8]> {
        self.find(TagType::Uid)
    }

    pub fn status(&self) -> Option<TerminalStatus> {
        self.find(TagType::Status).and_then(|v| v.first()).map(|b| TerminalStatus::from_byte(*b))
    }

    pub fn response_code(&self) -> Option<ResponseCode> {
        self.find(TagType::ResponseCode).and_then(|v| v.first()).map(|b| ResponseCode(*b))
    }

    pub fn apdu_response(&self) -> Option<&[u8]> {
        self.find(TagType::ApduResponse)
    }

    pub fn card_type(&self) -> Option<u8> {
        self.find(TagType::CardType).and_then(|v| v.first()).copied()
    }

    /// Little-endian `u16` reader for tags whose value is a two-byte int.
    pub fn le_u16(&self, tag: TagType) -> Option<u16> {
        let v = self.find(tag)?;
        if v.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([v[0], v[1]]))
    }

    /// Little-endian `u32` reader for tags whose value is a four-byte int.
    pub fn le_u32(&self, tag: TagType) -> Option<u32> {
        let v = self.find(tag)?;
        if v.len() < 4 {
            return None;
        }
        Some(u32::from_le_bytes([v[0], v[1], v[2], v[3]]))
    }
}

/// `ResponseCode == 0x00`. Other codes (e.g. `0xF4 ERR_CMD_EXEC`) are logged
/// by callers but may still be semantically accepted (`BACK_TO_IDLE`).
pub fn is_response_code_ok(code: ResponseCode) -> bool {
    code.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_supported_tags() {
        let payload = PayloadBuilder::new()
            .command(Command::ClCardInfo)
            .sam_slot(2)
            .subject(0x01)
            .turn_number(128)
            .uid(&[0x04, 0xA1, 0xB2, 0xC3])
            .status(TerminalStatus::Idle)
            .response_code(ResponseCode::OK)
            .build();

        let encoded = payload.encode();
        let decoded = Payload::decode(&encoded).expect("decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn find_missing_tag_returns_none() {
        let payload = PayloadBuilder::new().command(Command::GetState).build();
        assert!(payload.find(TagType::Uid).is_none());
        assert!(matches!(
            payload.require(TagType::Uid),
            Err(CoreError::MissingTlvTag(tag)) if tag == TagType::Uid.byte()
        ));
    }

    #[test]
    fn response_code_ok_predicate() {
        assert!(is_response_code_ok(ResponseCode::OK));
        assert!(!is_response_code_ok(ResponseCode::ERR_CMD_EXEC));
    }

    #[test]
    fn decode_rejects_truncated_value() {
        // tag=0x08, length=4, but only 2 bytes of value follow.
        let bytes = [0x08, 0x04, 0x00, 0xAA, 0xBB];
        assert!(Payload::decode(&bytes).is_err());
    }

    #[test]
    fn le_u32_reads_four_byte_little_endian() {
        let payload = PayloadBuilder::new().build();
        let mut raw = payload.encode();
        // Hand-construct a record to exercise le_u32 on an arbitrary tag.
        raw.push(TagType::CardType.byte());
        raw.extend_from_slice(&4u16.to_le_bytes());
        raw.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        let decoded = Payload::decode(&raw).expect("decode");
        assert_eq!(decoded.le_u32(TagType::CardType), Some(0x0403_0201));
    }
}
