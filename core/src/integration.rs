//! Collaborators the engine consumes. `AnalyticsStore` implements all of them
//! over SQLite; tests substitute stubs for individual seams.

use crate::error::EngineResult;
use crate::query::{Channel, KpiQuery};
use crate::result::QueryResult;
use crate::kpi::EventQuery;
use crate::types::ProjectId;
use rusqlite::types::Value as SqlValue;
use std::collections::BTreeMap;

/// Per-tenant integration metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantSettings {
    pub project_id: ProjectId,
    pub timezone: String,
    /// Bucket event KPIs in `timezone` instead of the query's zone.
    pub timezone_correction: bool,
    /// Account ids (or URL prefixes for organic search) per channel.
    pub accounts: BTreeMap<Channel, Vec<String>>,
}

impl TenantSettings {
    pub fn new(project_id: ProjectId, timezone: &str) -> Self {
        Self {
            project_id,
            timezone: timezone.to_string(),
            timezone_correction: false,
            accounts: BTreeMap::new(),
        }
    }

    pub fn accounts_for(&self, channel: Channel) -> &[String] {
        self.accounts.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_integrated(&self, channel: Channel) -> bool {
        !self.accounts_for(channel).is_empty()
    }
}

pub trait TenantSettingsProvider: Send + Sync {
    fn tenant_settings(&self, project_id: ProjectId) -> EngineResult<TenantSettings>;
}

/// Tenant-defined breakdown properties: name to data type.
pub trait SmartPropertyCatalog: Send + Sync {
    fn smart_properties(
        &self,
        project_id: ProjectId,
        object_type: &str,
        source: &str,
    ) -> EngineResult<BTreeMap<String, String>>;
}

/// Runs rendered SQL. Headers are the statement's column names; zero rows is
/// a valid result.
pub trait SqlExecutor: Send + Sync {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> EngineResult<QueryResult>;
}

pub trait EventQueryExecutor: Send + Sync {
    fn execute_event_query(&self, project_id: ProjectId, query: &EventQuery)
        -> EngineResult<QueryResult>;
}

pub trait ProfileQueryExecutor: Send + Sync {
    fn execute_profile_query(&self, project_id: ProjectId, query: &KpiQuery)
        -> EngineResult<QueryResult>;
}
