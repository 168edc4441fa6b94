// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived-state containers (component C5, spec §3): pure reducers over the
//! proxy/event streams that the rest of the core reads snapshots of.

pub mod ifsf_app;
pub mod sam_duk;
pub mod transit_app;

pub use ifsf_app::{IfsfAppEvent, IngenicoIfsfApp};
pub use sam_duk::{AuthProcessState, SamAtr, SamDuk, SamDukEvent, UnlockStatus};
pub use transit_app::{IngenicoTransitApp, TerminalStatusCode, TerminalStatusValue, TransitAppEvent};
