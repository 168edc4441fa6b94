// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Card-tap session controller (component C7, spec §3/§4.7).

pub mod controller;
pub mod session_state;

pub use controller::{CardTapController, TapPreconditions};
pub use session_state::{
    AttemptMonitor, CardDetectedData, CardTapSource, CardTappingRequest, ECardTapSessionState,
};
