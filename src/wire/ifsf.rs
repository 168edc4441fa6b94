// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IFSF XML DTOs and length-framed transport (spec §3, §6).
//!
//! IFSF payloads are XML documents over the same length-prefixed transport
//! shape as Transit (`{length:u16 LE, xml_bytes}`), but the payload itself
//! is a `Diagnosis` or `DeviceOutput` DTO rather than a TLV blob. Some DTOs
//! are fire-and-forget (ack only); others expect a correlated response.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Diagnosis request/response DTO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "Diagnosis")]
pub struct Diagnosis {
    #[serde(rename = "RequestID")]
    pub request_id: u32,
    #[serde(rename = "TerminalID", skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    #[serde(rename = "ResultCode", skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
}

/// DeviceOutput request/response DTO (display/printer collaborator hand-off
/// is out of scope, but the app still relays the DTO to satisfy diagnosis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "DeviceOutput")]
pub struct DeviceOutput {
    #[serde(rename = "RequestID")]
    pub request_id: u32,
    #[serde(rename = "Text", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The closed set of IFSF DTOs this core exchanges with the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfsfDto {
    Diagnosis(Diagnosis),
    DeviceOutput(DeviceOutput),
}

impl IfsfDto {
    pub fn request_id(&self) -> u32 {
        match self {
            Self::Diagnosis(d) => d.request_id,
            Self::DeviceOutput(d) => d.request_id,
        }
    }

    /// `DeviceOutput` is fire-and-forget (ack only); `Diagnosis` expects a
    /// correlated response (spec §3).
    pub fn expects_response(&self) -> bool {
        matches!(self, Self::Diagnosis(_))
    }

    pub fn encode_xml(&self) -> Result<String, CoreError> {
        let xml = match self {
            Self::Diagnosis(d) => quick_xml::se::to_string(d),
            Self::DeviceOutput(d) => quick_xml::se::to_string(d),
        };
        xml.map_err(|e| CoreError::InvalidResponse(format!("xml encode: {e}")))
    }

    pub fn decode_xml(xml: &str) -> Result<Self, CoreError> {
        if xml.contains("<Diagnosis") {
            let dto: Diagnosis = quick_xml::de::from_str(xml)
                .map_err(|e| CoreError::InvalidResponse(format!("xml decode: {e}")))?;
            Ok(Self::Diagnosis(dto))
        } else if xml.contains("<DeviceOutput") {
            let dto: DeviceOutput = quick_xml::de::from_str(xml)
                .map_err(|e| CoreError::InvalidResponse(format!("xml decode: {e}")))?;
            Ok(Self::DeviceOutput(dto))
        } else {
            Err(CoreError::InvalidResponse("unrecognized IFSF DTO".to_owned()))
        }
    }
}

/// A length-framed IFSF envelope: `{length: u16 LE, xml_bytes}`.
pub struct IfsfFrame;

impl IfsfFrame {
    pub fn encode(xml: &str) -> Vec<u8> {
        let bytes = xml.as_bytes();
        let mut out = Vec::with_capacity(2 + bytes.len());
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(bytes);
        out
    }

    /// Split one complete envelope off `buf`, returning `(xml, consumed)`.
    pub fn try_decode(buf: &[u8]) -> Result<Option<(String, usize)>, CoreError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let length = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let total = 2 + length;
        if buf.len() < total {
            return Ok(None);
        }
        let xml = String::from_utf8(buf[2..total].to_vec())
            .map_err(|e| CoreError::InvalidResponse(format!("non-utf8 xml: {e}")))?;
        Ok(Some((xml, total)))
    }
}

/// An outstanding IFSF request awaiting a correlated response, or a
/// fire-and-forget send awaiting only the transport-level ack.
pub struct IfsfProtMsg {
    pub request_id: u32,
    pub dto: IfsfDto,
    pub reply: Option<tokio::sync::oneshot::Sender<Option<IfsfDto>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnosis_round_trips_through_xml() {
        let dto = IfsfDto::Diagnosis(Diagnosis {
            request_id: 5,
            terminal_id: Some("T001".to_owned()),
            result_code: None,
        });
        let xml = dto.encode_xml().expect("encode");
        let decoded = IfsfDto::decode_xml(&xml).expect("decode");
        assert_eq!(decoded, dto);
    }

    #[test]
    fn device_output_is_fire_and_forget() {
        let dto = IfsfDto::DeviceOutput(DeviceOutput { request_id: 1, text: Some("hi".to_owned()) });
        assert!(!dto.expects_response());
    }

    #[test]
    fn diagnosis_expects_response() {
        let dto = IfsfDto::Diagnosis(Diagnosis { request_id: 1, terminal_id: None, result_code: None });
        assert!(dto.expects_response());
    }

    #[test]
    fn frame_round_trip() {
        let bytes = IfsfFrame::encode("<Diagnosis><RequestID>1</RequestID></Diagnosis>");
        let (xml, consumed) = IfsfFrame::try_decode(&bytes).expect("decode").expect("complete");
        assert_eq!(consumed, bytes.len());
        assert!(xml.contains("Diagnosis"));
    }

    #[test]
    fn frame_partial_returns_none() {
        let bytes = IfsfFrame::encode("<Diagnosis><RequestID>1</RequestID></Diagnosis>");
        assert!(IfsfFrame::try_decode(&bytes[..bytes.len() - 1]).expect("no error").is_none());
    }
}
