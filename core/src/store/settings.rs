use super::AnalyticsStore;
use crate::{
    error::EngineResult,
    integration::{SmartPropertyCatalog, TenantSettings, TenantSettingsProvider},
    query::Channel,
    tz::parse_tz,
    types::ProjectId,
};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

impl AnalyticsStore {
    // ── Tenant settings ──────────────────────────────────────────────

    /// Insert or replace the tenant row and add its channel accounts.
    pub fn upsert_tenant_settings(&self, settings: &TenantSettings) -> EngineResult<()> {
        parse_tz(&settings.timezone)?;
        let conn = self.anchor()?;
        conn.execute(
            "INSERT INTO tenant_settings (project_id, timezone, timezone_correction)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(project_id) DO UPDATE SET
                timezone = excluded.timezone,
                timezone_correction = excluded.timezone_correction",
            params![
                settings.project_id,
                settings.timezone,
                settings.timezone_correction as i64
            ],
        )?;
        for (channel, accounts) in &settings.accounts {
            for account in accounts {
                conn.execute(
                    "INSERT OR IGNORE INTO channel_integrations (project_id, channel, account_id)
                     VALUES (?1, ?2, ?3)",
                    params![settings.project_id, channel.as_str(), account],
                )?;
            }
        }
        Ok(())
    }

    pub fn add_integration(
        &self,
        project_id: ProjectId,
        channel: Channel,
        account_id: &str,
    ) -> EngineResult<()> {
        self.anchor()?.execute(
            "INSERT OR IGNORE INTO channel_integrations (project_id, channel, account_id)
             VALUES (?1, ?2, ?3)",
            params![project_id, channel.as_str(), account_id],
        )?;
        Ok(())
    }

    // ── Smart properties ─────────────────────────────────────────────

    pub fn add_smart_property(
        &self,
        project_id: ProjectId,
        object_type: &str,
        source: &str,
        name: &str,
        data_type: &str,
    ) -> EngineResult<()> {
        self.anchor()?.execute(
            "INSERT OR REPLACE INTO smart_property_rules (project_id, object_type, source, name, data_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, object_type, source, name, data_type],
        )?;
        Ok(())
    }
}

impl TenantSettingsProvider for AnalyticsStore {
    fn tenant_settings(&self, project_id: ProjectId) -> EngineResult<TenantSettings> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT timezone, timezone_correction FROM tenant_settings WHERE project_id = ?1",
                params![project_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()?;
        let (timezone, timezone_correction) =
            row.unwrap_or_else(|| (self.default_timezone.clone(), false));

        let mut settings = TenantSettings::new(project_id, &timezone);
        settings.timezone_correction = timezone_correction;

        let mut stmt = conn.prepare(
            "SELECT channel, account_id FROM channel_integrations
             WHERE project_id = ?1 ORDER BY channel, account_id",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (channel, account) = row?;
            match channel.parse::<Channel>() {
                Ok(channel) => settings.accounts.entry(channel).or_default().push(account),
                Err(_) => log::warn!("project_id={project_id} ignoring integration for unknown channel={channel}"),
            }
        }
        Ok(settings)
    }
}

impl SmartPropertyCatalog for AnalyticsStore {
    fn smart_properties(
        &self,
        project_id: ProjectId,
        object_type: &str,
        source: &str,
    ) -> EngineResult<BTreeMap<String, String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT name, data_type FROM smart_property_rules
             WHERE project_id = ?1 AND object_type = ?2 AND source = ?3",
        )?;
        let rows = stmt.query_map(params![project_id, object_type, source], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<Result<BTreeMap<_, _>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AnalyticsStore {
        let store = AnalyticsStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn missing_tenant_gets_default_zone_and_no_accounts() {
        let store = store().with_default_timezone("Europe/Berlin");
        let settings = store.tenant_settings(9).unwrap();
        assert_eq!(settings.timezone, "Europe/Berlin");
        assert!(!settings.timezone_correction);
        assert!(settings.accounts.is_empty());
    }

    #[test]
    fn settings_round_trip_through_upsert() {
        let store = store();
        let mut settings = TenantSettings::new(1, "Asia/Kolkata");
        settings.timezone_correction = true;
        settings
            .accounts
            .insert(Channel::SocialAds, vec!["act_1".into(), "act_2".into()]);
        store.upsert_tenant_settings(&settings).unwrap();
        store.add_integration(1, Channel::PaidSearch, "123").unwrap();

        let loaded = store.tenant_settings(1).unwrap();
        assert_eq!(loaded.timezone, "Asia/Kolkata");
        assert!(loaded.timezone_correction);
        assert_eq!(loaded.accounts_for(Channel::SocialAds), ["act_1", "act_2"]);
        assert!(loaded.is_integrated(Channel::PaidSearch));
        assert!(!loaded.is_integrated(Channel::ProfessionalAds));
    }

    #[test]
    fn invalid_zone_is_not_stored() {
        let store = store();
        assert!(store
            .upsert_tenant_settings(&TenantSettings::new(1, "Mars/Base"))
            .is_err());
    }

    #[test]
    fn smart_properties_are_scoped_by_source() {
        let store = store();
        store.add_smart_property(1, "campaign", "google_ads", "region", "categorical").unwrap();
        store.add_smart_property(1, "campaign", "all", "tier", "numerical").unwrap();
        let google = store.smart_properties(1, "campaign", "google_ads").unwrap();
        assert_eq!(google.len(), 1);
        assert_eq!(google["region"], "categorical");
        assert!(store.smart_properties(2, "campaign", "google_ads").unwrap().is_empty());
    }
}
