// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the Ingenico card-interaction core.
#[derive(Debug, Clone, clap::Args)]
pub struct CoreConfig {
    /// Local TCP port the Transit app connects to.
    #[arg(long, default_value_t = 9000, env = "INGENICO_CORE_TRANSIT_PORT")]
    pub transit_port: u16,

    /// Local TCP port the IFSF app connects to.
    #[arg(long, default_value_t = 9001, env = "INGENICO_CORE_IFSF_PORT")]
    pub ifsf_port: u16,

    /// Peer port on the reader itself (informational, spec §6 default 2914).
    #[arg(long, default_value_t = 2914, env = "INGENICO_CORE_READER_PEER_PORT")]
    pub reader_peer_port: u16,

    /// Time since last received traffic after which an app is no longer "alive".
    #[arg(long, default_value_t = 15_000, env = "INGENICO_CORE_APP_ALIVE_TIMEOUT_MS")]
    pub app_alive_timeout_ms: u64,

    /// Master loop sweep cadence (spec §4.10, default 15ms).
    #[arg(long, default_value_t = 15, env = "INGENICO_CORE_MASTER_LOOP_INTERVAL_MS")]
    pub master_loop_interval_ms: u64,

    /// Session inactivity expiry (spec §3, default 5 minutes).
    #[arg(long, default_value_t = 300_000, env = "INGENICO_CORE_SESSION_EXPIRY_MS")]
    pub session_expiry_ms: u64,

    /// Maintenance-mode auto-expiry (spec §4.7, default 20 minutes).
    #[arg(long, default_value_t = 1_200_000, env = "INGENICO_CORE_MAINTENANCE_TIMEOUT_MS")]
    pub maintenance_timeout_ms: u64,

    /// Path to the persisted `emv.properties` file (spec §6).
    #[arg(long, default_value = "emv.properties", env = "INGENICO_CORE_PROPERTIES_PATH")]
    pub properties_path: PathBuf,
}

impl CoreConfig {
    pub fn app_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.app_alive_timeout_ms)
    }

    pub fn master_loop_interval(&self) -> Duration {
        Duration::from_millis(self.master_loop_interval_ms)
    }

    pub fn session_expiry(&self) -> Duration {
        Duration::from_millis(self.session_expiry_ms)
    }

    pub fn maintenance_timeout(&self) -> Duration {
        Duration::from_millis(self.maintenance_timeout_ms)
    }

    /// Validate port fields (spec §8: `1 <= port <= 65535`).
    ///
    /// `u16` already bounds the range on the high end; only zero needs
    /// rejecting explicitly.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.transit_port == 0 {
            anyhow::bail!("transit_port must be in 1..=65535");
        }
        if self.ifsf_port == 0 {
            anyhow::bail!("ifsf_port must be in 1..=65535");
        }
        Ok(())
    }
}
