// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session cipher (spec §4.1): a symmetric block cipher initialized during
//! SAM authentication (`SamDukAuthStateMachine`, spec §4.6), used to
//! encrypt/decrypt APDU payloads exchanged with the card via the SAM.
//!
//! Must not be used before `SamDuk.auth.is_authenticated` — callers enforce
//! that precondition; this module only implements the primitive.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CoreError;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

const KEY_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// A derived AES-128-CBC session key, created once SAM authentication
/// finishes successfully.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; KEY_LEN],
    iv: [u8; BLOCK_LEN],
}

impl SessionCipher {
    /// Derive a session cipher from the raw key material exchanged during
    /// SAM authentication. `key` and `iv` must each be exactly 16 bytes.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CoreError> {
        if key.len() != KEY_LEN || iv.len() != BLOCK_LEN {
            return Err(CoreError::CipherError("key/iv must be 16 bytes".to_owned()));
        }
        let mut key_arr = [0u8; KEY_LEN];
        let mut iv_arr = [0u8; BLOCK_LEN];
        key_arr.copy_from_slice(key);
        iv_arr.copy_from_slice(iv);
        Ok(Self { key: key_arr, iv: iv_arr })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let encryptor = Encryptor::new(&self.key.into(), &self.iv.into());
        Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CoreError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CoreError::CipherError("ciphertext not block-aligned".to_owned()));
        }
        let decryptor = Decryptor::new(&self.key.into(), &self.iv.into());
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CoreError::CipherError("padding violation".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SessionCipher {
        SessionCipher::new(&[0x11; KEY_LEN], &[0x22; BLOCK_LEN]).expect("valid key/iv")
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let cipher = test_cipher();
        let plaintext = b"encrypt-this-pin-block!!".to_vec();
        let ciphertext = cipher.encrypt(&plaintext).expect("encrypt");
        let decrypted = cipher.decrypt(&ciphertext).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn rejects_non_block_aligned_ciphertext() {
        let cipher = test_cipher();
        assert!(cipher.decrypt(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn rejects_malformed_key_length() {
        assert!(SessionCipher::new(&[0x00; 8], &[0x00; BLOCK_LEN]).is_err());
    }

    #[test]
    fn decrypt_of_garbage_ciphertext_reports_padding_violation() {
        let cipher = test_cipher();
        // Block-aligned, but near-certainly not a valid PKCS7 padded block.
        let garbage = vec![0xFF; BLOCK_LEN];
        assert!(matches!(cipher.decrypt(&garbage), Err(CoreError::CipherError(_))));
    }
}
