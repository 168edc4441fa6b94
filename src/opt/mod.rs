// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation framework and concrete OPTs (component C8, spec §4.8/§4.9).

pub mod framework;
pub mod sam_opts;

pub use framework::{execute, Opt, OptResult};
pub use sam_opts::{CardDuk, DukCardReaderOpt, EmvCardDetectorOpt, ReadSchema, SamVerifyPinOpt};
