// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingenico card-interaction core: a single-writer protocol/FSM engine that
//! speaks the Transit and IFSF wire protocols to a reader over TCP, runs the
//! reader-init and SAM-auth state machines, and exposes a small session-based
//! boundary (`startUnlock` / `startCardRead`) to an orchestration layer.

pub mod appstate;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod masterloop;
pub mod net;
pub mod opt;
pub mod orchestrator;
pub mod persist;
pub mod proxy;
pub mod statemachine;
pub mod tapctl;
pub mod wire;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::masterloop::{MasterLoop, MasterLoopHandle};
use crate::net::TcpEndpoint;
use crate::orchestrator::SessionManager;

/// Everything a collaborator needs to drive the core: the command handle
/// into the running master loop, plus a token to request shutdown.
pub struct CoreHandle {
    pub master_loop: MasterLoopHandle,
    pub shutdown: CancellationToken,
}

/// Binds both reader-facing TCP endpoints, starts the master loop on its own
/// task, and returns a handle to it. The caller owns the master loop task's
/// lifetime via the returned `JoinHandle` and can request shutdown through
/// `CoreHandle::shutdown`.
pub async fn run(config: CoreConfig) -> anyhow::Result<(CoreHandle, tokio::task::JoinHandle<()>)> {
    config.validate()?;
    let shutdown = CancellationToken::new();

    let transit_endpoint = TcpEndpoint::bind("transit", config.transit_port, shutdown.clone()).await?;
    let ifsf_endpoint = TcpEndpoint::bind("ifsf", config.ifsf_port, shutdown.clone()).await?;
    tracing::info!(
        transit_port = config.transit_port,
        ifsf_port = config.ifsf_port,
        "ingenico-core listening"
    );

    let sessions = Arc::new(SessionManager::new());
    let (master_loop, handle) = MasterLoop::new(config, transit_endpoint, ifsf_endpoint, sessions, shutdown.clone());
    let join = tokio::spawn(master_loop.run());

    Ok((CoreHandle { master_loop: handle, shutdown }, join))
}
