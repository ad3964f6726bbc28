use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use reportd_core::{OrgId, ReportdError, Settings};
use reportd_ledger::Ledger;
use tracing::info;

/// Per-organization settings snapshots.
///
/// Readers get an `Arc<Settings>` that never changes underneath them; a save
/// persists first and then swaps the cached `Arc`, so runs already in flight
/// keep the snapshot they started with.
pub struct SettingsCache {
    ledger: Arc<Ledger>,
    cache: DashMap<OrgId, Arc<Settings>>,
}

impl SettingsCache {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            cache: DashMap::new(),
        }
    }

    /// Current settings of `org_id`, persisting defaults on first access.
    pub fn get(&self, org_id: OrgId) -> Result<Arc<Settings>, ReportdError> {
        if let Some(s) = self.cache.get(&org_id) {
            return Ok(s.clone());
        }

        let settings = match self.ledger.get_settings(org_id)? {
            Some(s) => s,
            None => {
                info!(org_id, "initialising default settings");
                self.ledger
                    .save_settings(&Settings::defaults_for(org_id), Utc::now())?
            }
        };
        let settings = Arc::new(settings);
        self.cache.insert(org_id, settings.clone());
        Ok(settings)
    }

    /// Validate, persist and publish new settings for `org_id`.
    pub fn save(&self, org_id: OrgId, mut settings: Settings) -> Result<Arc<Settings>, ReportdError> {
        settings.org_id = org_id;
        settings.validate()?;
        let saved = Arc::new(self.ledger.save_settings(&settings, Utc::now())?);
        self.cache.insert(org_id, saved.clone());
        info!(
            org_id,
            max_concurrent_renders = saved.limits.max_concurrent_renders,
            "settings saved"
        );
        Ok(saved)
    }

    /// Overwrite the settings of `org_id` with defaults.
    pub fn reset(&self, org_id: OrgId) -> Result<Arc<Settings>, ReportdError> {
        self.save(org_id, Settings::defaults_for(org_id))
    }
}
