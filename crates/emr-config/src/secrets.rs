//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"EMR_DATABASE_URL"`).
//! - At startup, callers invoke [`resolve_secrets_for_mode`] once and pass the
//!   returned [`ResolvedSecrets`] into constructors; no other module reads
//!   `std::env::var` for secrets.
//! - `Debug` redacts values. Error messages name the env var, never the value.
//!
//! # Enforcement
//! | Mode    | Backend  | Required      |
//! |---------|----------|---------------|
//! | SERVICE | postgres | database URL  |
//! | JOBS    | postgres | database URL  |
//! | any     | memory   | nothing       |

use anyhow::{bail, Result};
use serde_json::Value;

use crate::{ConfigMode, EmrSettings, StoreBackend};

pub const DEFAULT_DATABASE_URL_ENV: &str = "EMR_DATABASE_URL";

/// Values resolved from the environment. **Redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Env var the database URL was read from (a name, safe to log).
    pub database_url_env: String,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url_env", &self.database_url_env)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Non-empty trimmed string at `pointer`, else `None`.
fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// `None` when the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve secrets for `mode`.
///
/// # Errors
/// `SECRETS_MISSING` naming the env var when the Postgres backend is selected
/// and the database URL variable is unset. Settings errors propagate.
pub fn resolve_secrets_for_mode(config_json: &Value, mode: ConfigMode) -> Result<ResolvedSecrets> {
    let settings = EmrSettings::from_config_json(config_json)?;

    let database_url_env = read_str_at(config_json, "/store/database_url_env")
        .unwrap_or_else(|| DEFAULT_DATABASE_URL_ENV.to_string());
    let database_url = resolve_env(&database_url_env);

    if settings.store_backend == StoreBackend::Postgres && database_url.is_none() {
        bail!(
            "SECRETS_MISSING mode={}: required env var '{}' (database url) is not set or empty",
            mode.as_str(),
            database_url_env,
        );
    }

    Ok(ResolvedSecrets {
        database_url_env,
        database_url,
    })
}
