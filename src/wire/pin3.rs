// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PIN-3 data builder (spec §4.1): the plaintext block that gets encrypted
//! with the session cipher before being wrapped into a `verifyPin3` APDU.

/// Plaintext PIN-3 payload: card UID plus the 6-digit PIN, padded to a
/// fixed 16-byte block before encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin3Data {
    pub uid: Vec<u8>,
    pub pin: String,
}

impl Pin3Data {
    pub fn new(uid: Vec<u8>, pin: String) -> Self {
        Self { uid, pin }
    }

    /// Serialize to the fixed-layout plaintext block the SAM expects:
    /// 1 byte UID length, up to 10 bytes UID (zero-padded), 6 ASCII PIN
    /// digits — 17 bytes, padded by the caller's cipher to the block size.
    pub fn to_plaintext(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17);
        out.push(self.uid.len() as u8);
        let mut uid_field = [0u8; 10];
        let n = self.uid.len().min(10);
        uid_field[..n].copy_from_slice(&self.uid[..n]);
        out.extend_from_slice(&uid_field);
        out.extend_from_slice(self.pin.as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_layout_is_length_prefixed_uid_then_pin() {
        let data = Pin3Data::new(vec![0x04, 0xA1, 0xB2, 0xC3], "123456".to_owned());
        let plaintext = data.to_plaintext();
        assert_eq!(plaintext[0], 4);
        assert_eq!(&plaintext[1..5], &[0x04, 0xA1, 0xB2, 0xC3]);
        assert_eq!(&plaintext[11..], b"123456");
    }
}
