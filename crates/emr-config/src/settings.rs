use std::fmt;
use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub const DEFAULT_UPDATE_REQUEST_VALIDITY_DAYS: i64 = 7;
pub const DEFAULT_REMINDER_LEAD_DAYS: i64 = 1;
pub const DEFAULT_MAX_SAVE_RETRIES: u32 = 3;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
/// Upper bound for the day-count settings; keeps date arithmetic in range.
pub const MAX_LIFECYCLE_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Postgres => "postgres",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" => Ok(StoreBackend::Postgres),
            other => bail!("CONFIG_INVALID /store/backend: '{other}'; expected memory | postgres"),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of the config keys the service and jobs read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmrSettings {
    pub update_request_validity_days: i64,
    pub reminder_lead_days: i64,
    pub max_save_retries: u32,
    pub store_backend: StoreBackend,
    pub sweep_interval_secs: u64,
    pub bind_addr: SocketAddr,
}

impl EmrSettings {
    /// Absent keys take defaults; present keys of the wrong type or out of
    /// range are errors naming the pointer.
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let update_request_validity_days = read_i64(
            config,
            "/lifecycle/update_request_validity_days",
            DEFAULT_UPDATE_REQUEST_VALIDITY_DAYS,
        )?;
        if !(1..=MAX_LIFECYCLE_DAYS).contains(&update_request_validity_days) {
            bail!(
                "CONFIG_INVALID /lifecycle/update_request_validity_days: must be in 1..={MAX_LIFECYCLE_DAYS}"
            );
        }

        let reminder_lead_days = read_i64(
            config,
            "/lifecycle/reminder_lead_days",
            DEFAULT_REMINDER_LEAD_DAYS,
        )?;
        if !(0..=MAX_LIFECYCLE_DAYS).contains(&reminder_lead_days) {
            bail!("CONFIG_INVALID /lifecycle/reminder_lead_days: must be in 0..={MAX_LIFECYCLE_DAYS}");
        }

        let max_save_retries = read_u64(
            config,
            "/lifecycle/max_save_retries",
            u64::from(DEFAULT_MAX_SAVE_RETRIES),
        )?;
        let max_save_retries = u32::try_from(max_save_retries)
            .context("CONFIG_INVALID /lifecycle/max_save_retries: out of range")?;

        let store_backend = match config.pointer("/store/backend") {
            None | Some(Value::Null) => StoreBackend::Memory,
            Some(Value::String(s)) => StoreBackend::parse(s)?,
            Some(_) => bail!("CONFIG_INVALID /store/backend: expected a string"),
        };

        let sweep_interval_secs = read_u64(
            config,
            "/daemon/sweep_interval_secs",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?;
        if sweep_interval_secs == 0 {
            bail!("CONFIG_INVALID /daemon/sweep_interval_secs: must be > 0");
        }

        let bind_addr = match config.pointer("/daemon/bind_addr") {
            None | Some(Value::Null) => DEFAULT_BIND_ADDR,
            Some(Value::String(s)) => s.as_str(),
            Some(_) => bail!("CONFIG_INVALID /daemon/bind_addr: expected a string"),
        };
        let bind_addr: SocketAddr = bind_addr
            .trim()
            .parse()
            .with_context(|| format!("CONFIG_INVALID /daemon/bind_addr: '{bind_addr}'"))?;

        Ok(Self {
            update_request_validity_days,
            reminder_lead_days,
            max_save_retries,
            store_backend,
            sweep_interval_secs,
            bind_addr,
        })
    }
}

fn read_i64(config: &Value, pointer: &str, default: i64) -> Result<i64> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_i64()
            .with_context(|| format!("CONFIG_INVALID {pointer}: expected an integer")),
    }
}

fn read_u64(config: &Value, pointer: &str, default: u64) -> Result<u64> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .with_context(|| format!("CONFIG_INVALID {pointer}: expected a non-negative integer")),
    }
}
