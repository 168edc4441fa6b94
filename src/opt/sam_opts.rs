// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete OPTs used by the SAM-unlock and card-read order processors
//! (component C8/C9, spec §4.9).

use std::time::Duration;

use async_trait::async_trait;

use crate::appstate::sam_duk::UnlockStatus;
use crate::error::CoreError;
use crate::masterloop::MasterLoopHandle;
use crate::opt::framework::Opt;
use crate::wire::apdu::{
    is_unlocked, read_all_tickets, read_card_holder_info_file, read_card_info_file, read_value_ep_file,
    select_ppse, verify_pin3, ApduResponse,
};
use crate::wire::cipher::SessionCipher;
use crate::wire::pin3::Pin3Data;
use crate::wire::tags::Command;
use crate::wire::tlv::PayloadBuilder;

/// `SUBJECT` value for a customer-card APDU relay (spec §4.9).
const SUBJECT_CUSTOMER_CARD: u8 = 0x01;
const SAM_UNLOCK_TURN_NUMBER: u8 = 128;

/// Verifies a PIN against the SAM, then immediately issues a follow-up
/// `isUnlocked()` query so the observable `SamDuk.unlock_status` updates
/// promptly rather than waiting for the next periodic poll — the later of
/// the two constructor forms described in spec §9's open question, chosen
/// here per the spec's own resolution.
pub struct SamVerifyPinOpt {
    handle: MasterLoopHandle,
    sam_slot: u8,
    cipher: SessionCipher,
    uid: Vec<u8>,
    pin: String,
}

impl SamVerifyPinOpt {
    pub fn new(handle: MasterLoopHandle, sam_slot: u8, cipher: SessionCipher, uid: Vec<u8>, pin: String) -> Self {
        Self { handle, sam_slot, cipher, uid, pin }
    }
}

#[async_trait]
impl Opt for SamVerifyPinOpt {
    type Output = UnlockStatus;

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(3000)
    }

    async fn execute_task(&mut self) -> Result<UnlockStatus, CoreError> {
        let pin3 = Pin3Data::new(self.uid.clone(), self.pin.clone());
        let encrypted = self.cipher.encrypt(&pin3.to_plaintext())?;

        let payload = PayloadBuilder::new()
            .command(Command::SamTransmitEx)
            .sam_slot(self.sam_slot)
            .subject(SUBJECT_CUSTOMER_CARD)
            .turn_number(SAM_UNLOCK_TURN_NUMBER)
            .apdu_request(&verify_pin3(&encrypted))
            .build();
        let frame = self.handle.send_transit(payload, self.response_timeout()).await?;
        let apdu = ApduResponse::from_bytes(frame.payload.apdu_response().unwrap_or_default().to_vec());
        if !apdu.status_word_success() {
            return Err(CoreError::ApduStatusWordError);
        }

        let follow_up_timeout = Duration::from_millis(1000);
        let follow_up = PayloadBuilder::new()
            .command(Command::SamTransmit)
            .sam_slot(self.sam_slot)
            .apdu_request(&is_unlocked())
            .build();
        let frame = self.handle.send_transit(follow_up, follow_up_timeout).await?;
        let apdu = ApduResponse::from_bytes(frame.payload.apdu_response().unwrap_or_default().to_vec());
        let status = match apdu.data().first() {
            Some(0x01) => UnlockStatus::Completed,
            _ => UnlockStatus::NotUnlocked,
        };
        self.handle.set_sam_unlock_status(status);
        Ok(status)
    }
}

/// Probes for an EMV card via the PPSE-select APDU; a successful status word
/// means the PPSE directory exists, i.e. the card is EMV, not DUK.
pub struct EmvCardDetectorOpt {
    handle: MasterLoopHandle,
}

impl EmvCardDetectorOpt {
    pub fn new(handle: MasterLoopHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Opt for EmvCardDetectorOpt {
    type Output = ();

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(1000)
    }

    async fn execute_task(&mut self) -> Result<(), CoreError> {
        let payload = PayloadBuilder::new().command(Command::ClTransmit).apdu_request(&select_ppse()).build();
        let frame = self.handle.send_transit(payload, self.response_timeout()).await?;
        let apdu = ApduResponse::from_bytes(frame.payload.apdu_response().unwrap_or_default().to_vec());
        if apdu.status_word_success() {
            return Err(CoreError::NotADukCard);
        }
        Ok(())
    }
}

/// Which DUK files a card-read session pulls, keyed off the orchestrator
/// boundary's `schema` parameter (spec §4.9, §6: `"FULL"`/`"BASIC"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSchema {
    /// `"BASIC"` — just the card-info file.
    CardInfo,
    /// `"FULL"` — the complete ordered file set.
    EpPayment,
}

impl ReadSchema {
    pub fn from_boundary_name(name: &str) -> Option<Self> {
        match name {
            "BASIC" => Some(Self::CardInfo),
            "FULL" => Some(Self::EpPayment),
            _ => None,
        }
    }

    fn files(self) -> &'static [DukFile] {
        match self {
            Self::CardInfo => &[DukFile::CardInfo],
            Self::EpPayment => &[DukFile::CardInfo, DukFile::CardHolderInfo, DukFile::ValueEp, DukFile::Tickets],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DukFile {
    CardInfo,
    CardHolderInfo,
    ValueEp,
    Tickets,
}

/// Accumulated decrypted file contents read off a DUK card (spec §4.9
/// "`CardDuk` builder"). Each file's record layout is owned by a collaborator
/// this core does not parse further; bytes are kept opaque past decryption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardDuk {
    pub card_info: Option<Vec<u8>>,
    pub card_holder_info: Option<Vec<u8>>,
    pub value_ep: Option<Vec<u8>>,
    pub tickets: Option<Vec<u8>>,
}

pub struct DukCardReaderOpt {
    handle: MasterLoopHandle,
    sam_slot: u8,
    cipher: SessionCipher,
    schema: ReadSchema,
}

impl DukCardReaderOpt {
    pub fn new(handle: MasterLoopHandle, sam_slot: u8, cipher: SessionCipher, schema: ReadSchema) -> Self {
        Self { handle, sam_slot, cipher, schema }
    }

    async fn read_file(&mut self, file: DukFile) -> Result<Vec<u8>, CoreError> {
        let encrypted = self.cipher.encrypt(&[])?;
        let apdu_request = match file {
            DukFile::CardInfo => read_card_info_file(&encrypted),
            DukFile::CardHolderInfo => read_card_holder_info_file(&encrypted),
            DukFile::ValueEp => read_value_ep_file(&encrypted),
            DukFile::Tickets => read_all_tickets(&encrypted),
        };
        let payload = PayloadBuilder::new()
            .command(Command::SamTransmitEx)
            .sam_slot(self.sam_slot)
            .subject(SUBJECT_CUSTOMER_CARD)
            .apdu_request(&apdu_request)
            .build();
        let frame = self.handle.send_transit(payload, self.response_timeout()).await?;
        let apdu = ApduResponse::from_bytes(frame.payload.apdu_response().unwrap_or_default().to_vec());
        if !apdu.sam_and_desfire_status_ok() {
            return Err(CoreError::CardReadingError(format!("{file:?} read failed")));
        }
        self.cipher
            .decrypt(apdu.data())
            .map_err(|_| CoreError::CardReadingError(format!("{file:?} decrypt failed")))
    }
}

#[async_trait]
impl Opt for DukCardReaderOpt {
    type Output = CardDuk;

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(2000)
    }

    /// Reads the schema's file subset in the fixed order
    /// `{CARD_INFO, CARD_HOLDER_INFO, VALUE_EP, TICKETS}`, aborting with
    /// `CardReadingError` on the first failure (spec §4.9: "no partial
    /// success is reported").
    async fn execute_task(&mut self) -> Result<CardDuk, CoreError> {
        let mut duk = CardDuk::default();
        for file in self.schema.files() {
            let bytes = self.read_file(*file).await?;
            match file {
                DukFile::CardInfo => duk.card_info = Some(bytes),
                DukFile::CardHolderInfo => duk.card_holder_info = Some(bytes),
                DukFile::ValueEp => duk.value_ep = Some(bytes),
                DukFile::Tickets => duk.tickets = Some(bytes),
            }
        }
        Ok(duk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_schema_reads_only_card_info() {
        assert_eq!(ReadSchema::from_boundary_name("BASIC"), Some(ReadSchema::CardInfo));
        assert_eq!(ReadSchema::CardInfo.files(), &[DukFile::CardInfo]);
    }

    #[test]
    fn full_schema_reads_every_file_in_fixed_order() {
        assert_eq!(ReadSchema::from_boundary_name("FULL"), Some(ReadSchema::EpPayment));
        assert_eq!(
            ReadSchema::EpPayment.files(),
            &[DukFile::CardInfo, DukFile::CardHolderInfo, DukFile::ValueEp, DukFile::Tickets]
        );
    }

    #[test]
    fn unknown_schema_name_is_rejected() {
        assert_eq!(ReadSchema::from_boundary_name("WEIRD"), None);
    }
}
