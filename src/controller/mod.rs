// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol controllers (component C4, spec §4.4).

pub mod heartbeat;
pub mod ifsf_controller;
pub mod transit_controller;

pub use ifsf_controller::IfsfController;
pub use transit_controller::TransitController;
