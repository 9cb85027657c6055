//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use channel_kpi_core::{
    error::{EngineError, EngineResult},
    integration::{SqlExecutor, TenantSettings},
    query::Channel,
    result::QueryResult,
    store::{AnalyticsStore, ChannelDocument},
    types::{ProjectId, UnixTime},
};
use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const PROJECT: ProjectId = 1;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Unix time of `hh:mm` UTC on the given day.
pub fn ts(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> UnixTime {
    let naive = NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(hh, mm, 0))
        .expect("valid date");
    Utc.from_utc_datetime(&naive).timestamp()
}

pub fn empty_store() -> AnalyticsStore {
    init_logging();
    let store = AnalyticsStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

pub fn integrate(store: &AnalyticsStore, timezone: &str, correction: bool, channels: &[(Channel, &str)]) {
    let mut settings = TenantSettings::new(PROJECT, timezone);
    settings.timezone_correction = correction;
    for (channel, account) in channels {
        settings
            .accounts
            .entry(*channel)
            .or_default()
            .push(account.to_string());
    }
    store.upsert_tenant_settings(&settings).expect("tenant settings");
}

pub fn document(
    store: &AnalyticsStore,
    channel: Channel,
    account: &str,
    doc_type: &str,
    day: i64,
    ids: &[(&str, &str)],
    value: serde_json::Value,
) {
    store
        .insert_channel_document(&ChannelDocument {
            channel,
            project_id: PROJECT,
            account_id: account.to_string(),
            doc_type: doc_type.to_string(),
            day,
            ids: ids
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            value,
        })
        .expect("insert document");
}

/// Google and Facebook integrated with campaign-level reports on 2023-01-01
/// and 2023-01-02; LinkedIn integrated without any documents.
pub fn seeded_store() -> AnalyticsStore {
    let store = empty_store();
    integrate(
        &store,
        "UTC",
        false,
        &[
            (Channel::PaidSearch, "acc-1"),
            (Channel::SocialAds, "act-1"),
            (Channel::ProfessionalAds, "li-1"),
        ],
    );
    for (day, alpha, beta) in [(20230101, 60, 40), (20230102, 80, 10)] {
        document(
            &store,
            Channel::PaidSearch,
            "acc-1",
            "campaign_performance_report",
            day,
            &[("campaign_id", "c1")],
            json!({"campaign_name": "Alpha", "impressions": alpha, "clicks": 5, "cost": 2_000_000}),
        );
        document(
            &store,
            Channel::PaidSearch,
            "acc-1",
            "campaign_performance_report",
            day,
            &[("campaign_id", "c2")],
            json!({"campaign_name": "Beta", "impressions": beta, "clicks": 1, "cost": 500_000}),
        );
    }
    document(
        &store,
        Channel::SocialAds,
        "act-1",
        "campaign_insights",
        20230101,
        &[("campaign_id", "f1")],
        json!({"campaign_name": "Spring", "impressions": 250, "clicks": 7, "spend": 3.5}),
    );
    // Another tenant's data must never leak into project 1.
    store
        .insert_channel_document(&ChannelDocument {
            channel: Channel::PaidSearch,
            project_id: 2,
            account_id: "acc-1".into(),
            doc_type: "campaign_performance_report".into(),
            day: 20230101,
            ids: BTreeMap::new(),
            value: json!({"campaign_name": "Other", "impressions": 9999}),
        })
        .expect("insert document");
    store
}

/// Records every statement and answers from `inner` when present.
pub struct RecordingExecutor<'a> {
    pub inner: Option<&'a dyn SqlExecutor>,
    pub calls: Mutex<Vec<(String, Vec<SqlValue>)>>,
}

impl<'a> RecordingExecutor<'a> {
    pub fn wrapping(inner: &'a dyn SqlExecutor) -> Self {
        Self {
            inner: Some(inner),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every statement with an empty result.
    pub fn detached() -> Self {
        Self {
            inner: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl SqlExecutor for RecordingExecutor<'_> {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> EngineResult<QueryResult> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((sql.to_string(), params.to_vec()));
        match self.inner {
            Some(inner) => inner.execute(sql, params),
            None => Ok(QueryResult::default()),
        }
    }
}

/// Fails every statement with a message that names the table it touched.
pub struct FailingSql;

impl SqlExecutor for FailingSql {
    fn execute(&self, sql: &str, _params: &[SqlValue]) -> EngineResult<QueryResult> {
        Err(EngineError::Other(anyhow::anyhow!("disk I/O error while running {sql}")))
    }
}
