//! Startup wiring: config -> settings -> secrets -> store -> [`AppState`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use emr_config::secrets::resolve_secrets_for_mode;
use emr_config::{
    report_unused_keys, ConfigMode, EmrSettings, LoadedConfig, StoreBackend, UnusedKeyPolicy,
};
use emr_notify::PreferenceBook;
use emr_service::{EntityStore, ServicePolicy, SystemClock};
use emr_store::{InMemoryStore, PgStore};

use crate::state::AppState;

/// Build the daemon state from an already-loaded config.
///
/// Unused config keys are warned about, not fatal. The Postgres backend
/// requires an already-migrated schema.
pub async fn state_from_config(loaded: &LoadedConfig) -> Result<(AppState, EmrSettings)> {
    let settings = loaded.settings()?;

    let unused = report_unused_keys(
        ConfigMode::Service,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config keys not read by the daemon");
    }

    let secrets = resolve_secrets_for_mode(&loaded.config_json, ConfigMode::Service)?;
    let prefs = PreferenceBook::from_config_json(&loaded.config_json)?;

    let store: Arc<dyn EntityStore> = match settings.store_backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::Postgres => {
            let Some(url) = secrets.database_url.as_deref() else {
                bail!("SECRETS_MISSING: {} is not set", secrets.database_url_env);
            };
            let pool = emr_store::connect(url)
                .await
                .with_context(|| format!("connect via {}", secrets.database_url_env))?;
            let st = emr_store::status(&pool).await?;
            if !st.has_appointments_table {
                bail!("database schema missing; run `emr db migrate` first");
            }
            Arc::new(PgStore::new(pool))
        }
    };

    info!(
        backend = %settings.store_backend,
        config_hash = %loaded.config_hash,
        validity_days = settings.update_request_validity_days,
        preference_overrides = prefs.len(),
        "daemon state ready"
    );

    let state = AppState::new(
        store,
        Arc::new(SystemClock),
        ServicePolicy::from_settings(&settings),
        prefs,
        Some(loaded.config_hash.clone()),
    );
    Ok((state, settings))
}
