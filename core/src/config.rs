use crate::tz::parse_tz;
use serde::{Deserialize, Serialize};

/// Engine tunables loaded from `data/engine_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fan-out ceiling for channel query groups.
    pub channel_concurrency: usize,
    /// Fan-out ceiling for KPI metric units and event sub-queries.
    pub kpi_concurrency: usize,
    pub row_limit: usize,
    /// Row limit of the breakdown-discovery pass of a bucketed query.
    pub gbt_first_pass_limit: usize,
    pub filter_values_limit: usize,
    pub union_filter_values_limit: usize,
    /// Zone channel report days are converted into before bucketing.
    pub report_timezone: String,
    /// Used when a tenant has no settings row.
    pub default_tenant_timezone: String,
}

impl EngineConfig {
    /// Load config from the data directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/engine_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channel_concurrency == 0 || self.kpi_concurrency == 0 {
            anyhow::bail!("concurrency ceilings must be at least 1");
        }
        if self.row_limit == 0 {
            anyhow::bail!("row_limit must be at least 1");
        }
        for tz in [&self.report_timezone, &self.default_tenant_timezone] {
            parse_tz(tz).map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        Ok(())
    }

    /// Compiled-in defaults matching the shipped data file.
    pub fn default_test() -> Self {
        Self {
            channel_concurrency: 4,
            kpi_concurrency: 2,
            row_limit: 10_000,
            gbt_first_pass_limit: 1_000,
            filter_values_limit: 5_000,
            union_filter_values_limit: 2_500,
            report_timezone: "UTC".to_string(),
            default_tenant_timezone: "UTC".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let config = EngineConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/../data"))
            .expect("load shipped config");
        let defaults = EngineConfig::default_test();
        assert_eq!(config.channel_concurrency, defaults.channel_concurrency);
        assert_eq!(config.kpi_concurrency, defaults.kpi_concurrency);
        assert_eq!(config.row_limit, defaults.row_limit);
        assert_eq!(config.report_timezone, defaults.report_timezone);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = EngineConfig::default_test();
        config.kpi_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_timezone_is_rejected() {
        let mut config = EngineConfig::default_test();
        config.report_timezone = "Atlantis/Central".into();
        assert!(config.validate().is_err());
    }
}
