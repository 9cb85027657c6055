//! The query engine: channel routing, the all-channels union and KPI
//! execution all hang off [`QueryEngine`].
//!
//! EXECUTION FLOW:
//!   1. Validate the request (channel id, filter objects, identifiers).
//!   2. Load tenant integration settings.
//!   3. Build SQL per channel, or per KPI metric unit.
//!   4. Fan out independent work under a fixed concurrency ceiling.
//!   5. Normalize, merge and timezone-correct the results.
//!
//! RULES:
//!   - The engine holds no mutable state. Concurrent tasks only write their
//!     own result slot.
//!   - All SQL goes through `SqlExecutor`; the engine never opens connections.
//!   - Public calls return a result plus a `QueryStatus`. Partial success is
//!     reported, never raised.
//!   - SQL text and parameters are logged on failure and never returned.

use crate::{
    config::EngineConfig,
    error::EngineResult,
    integration::{
        EventQueryExecutor, ProfileQueryExecutor, SmartPropertyCatalog, SqlExecutor,
        TenantSettings, TenantSettingsProvider,
    },
    result::QueryResult,
    store::AnalyticsStore,
    types::ProjectId,
};
use rusqlite::types::Value as SqlValue;

pub struct QueryEngine<'a> {
    pub(crate) config: &'a EngineConfig,
    pub(crate) settings: &'a dyn TenantSettingsProvider,
    pub(crate) catalog: &'a dyn SmartPropertyCatalog,
    pub(crate) sql: &'a dyn SqlExecutor,
    pub(crate) events: &'a dyn EventQueryExecutor,
    pub(crate) profiles: &'a dyn ProfileQueryExecutor,
}

impl<'a> QueryEngine<'a> {
    /// Engine with every collaborator served by `store`.
    pub fn new(config: &'a EngineConfig, store: &'a AnalyticsStore) -> Self {
        Self {
            config,
            settings: store,
            catalog: store,
            sql: store,
            events: store,
            profiles: store,
        }
    }

    pub fn with_sql_executor(mut self, sql: &'a dyn SqlExecutor) -> Self {
        self.sql = sql;
        self
    }

    pub fn with_event_executor(mut self, events: &'a dyn EventQueryExecutor) -> Self {
        self.events = events;
        self
    }

    pub fn with_profile_executor(mut self, profiles: &'a dyn ProfileQueryExecutor) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_settings_provider(mut self, settings: &'a dyn TenantSettingsProvider) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub(crate) fn load_tenant(
        &self,
        project_id: ProjectId,
        req_id: &str,
    ) -> EngineResult<TenantSettings> {
        self.settings.tenant_settings(project_id).map_err(|e| {
            log::error!("req_id={req_id} project_id={project_id} tenant settings lookup failed: {e}");
            e
        })
    }

    /// Execute rendered SQL, logging the full statement on failure.
    pub(crate) fn run_sql(
        &self,
        req_id: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> EngineResult<QueryResult> {
        log::debug!("req_id={req_id} executing sql={sql}");
        self.sql.execute(sql, params).map_err(|e| {
            log::error!("req_id={req_id} query failed: {e} sql={sql} params={params:?}");
            e
        })
    }
}
