use super::records::{numeric_property, RecordSelect, RecordTable};
use super::AnalyticsStore;
use crate::{
    error::{EngineError, EngineResult},
    integration::{EventQueryExecutor, ProfileQueryExecutor, SqlExecutor},
    kpi::{EventAggregate, EventQuery},
    query::KpiQuery,
    result::QueryResult,
    sql::Predicate,
    tz::parse_tz,
    types::{ProjectId, UnixTime},
};
use rusqlite::{params, types::Value as SqlValue};

/// Profile metrics and their aggregate SQL.
static PROFILE_METRICS: &[(&str, &str)] = &[
    ("total_users", "COUNT(DISTINCT user_id)"),
    ("new_users", "COUNT(*)"),
];

impl AnalyticsStore {
    // ── Events ───────────────────────────────────────────────────────

    pub fn insert_event(
        &self,
        project_id: ProjectId,
        event_name: &str,
        user_id: &str,
        timestamp: UnixTime,
        properties: &serde_json::Value,
    ) -> EngineResult<()> {
        self.anchor()?.execute(
            "INSERT INTO events (project_id, event_name, user_id, timestamp, properties)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, event_name, user_id, timestamp, properties.to_string()],
        )?;
        Ok(())
    }

    // ── Profiles ─────────────────────────────────────────────────────

    pub fn insert_profile(
        &self,
        project_id: ProjectId,
        user_id: &str,
        joined_at: UnixTime,
        properties: &serde_json::Value,
    ) -> EngineResult<()> {
        self.anchor()?.execute(
            "INSERT OR REPLACE INTO profiles (project_id, user_id, joined_at, properties)
             VALUES (?1, ?2, ?3, ?4)",
            params![project_id, user_id, joined_at, properties.to_string()],
        )?;
        Ok(())
    }

    fn run_records(&self, select: &RecordSelect<'_>) -> EngineResult<QueryResult> {
        let (sql, params) = select.build()?.render();
        log::debug!("table={:?} metric={} sql={sql}", select.table, select.metric);
        let raw = self.execute(&sql, &params)?;
        Ok(select.normalize(raw))
    }
}

impl EventQueryExecutor for AnalyticsStore {
    fn execute_event_query(&self, project_id: ProjectId, query: &EventQuery) -> EngineResult<QueryResult> {
        let aggregate = match &query.aggregate {
            EventAggregate::CountEvents => "COUNT(*)".to_string(),
            EventAggregate::CountUsers => "COUNT(DISTINCT user_id)".to_string(),
            EventAggregate::SumProperty(property) => {
                format!("COALESCE(SUM({}), 0)", numeric_property(property)?)
            }
        };
        let select = RecordSelect {
            table: RecordTable::Events,
            project_id,
            filters: &query.filters,
            group_by: &query.group_by,
            group_by_timestamp: query.group_by_timestamp,
            from: query.from,
            to: query.to,
            tz: parse_tz(&query.timezone)?,
            aggregate,
            metric: &query.metric_name,
            extra: vec![Predicate::new(
                "event_name = ?",
                vec![SqlValue::Text(query.event_name.clone())],
            )],
        };
        self.run_records(&select)
    }
}

impl ProfileQueryExecutor for AnalyticsStore {
    fn execute_profile_query(&self, project_id: ProjectId, query: &KpiQuery) -> EngineResult<QueryResult> {
        let metric = query
            .metrics
            .first()
            .ok_or_else(|| EngineError::InvalidQuery("profile query without a metric".into()))?;
        let aggregate = PROFILE_METRICS
            .iter()
            .find(|(name, _)| *name == metric.as_str())
            .map(|(_, sql)| sql.to_string())
            .ok_or_else(|| EngineError::UnknownKpiMetric {
                display_category: query.display_category.clone(),
                metric: metric.clone(),
            })?;
        let select = RecordSelect {
            table: RecordTable::Profiles,
            project_id,
            filters: &query.filters,
            group_by: &query.group_by,
            group_by_timestamp: query.group_by_timestamp,
            from: query.from,
            to: query.to,
            tz: parse_tz(&query.timezone)?,
            aggregate,
            metric,
            extra: Vec::new(),
        };
        self.run_records(&select)
    }
}
