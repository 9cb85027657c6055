//! KPI group execution: channel and event KPIs, merging, derived formulas and
//! timezone correction.

mod common;

use channel_kpi_core::{
    config::EngineConfig,
    engine::QueryEngine,
    error::{EngineError, EngineResult},
    integration::EventQueryExecutor,
    kpi::EventQuery,
    query::{
        Channel, DerivedKpi, FilterCondition, GroupByTimestamp, KpiCategory, KpiFilter, KpiQuery,
        KpiQueryGroup, LogicalOp,
    },
    result::{Cell, QueryResult},
    status::QueryStatus,
    store::AnalyticsStore,
    types::ProjectId,
};
use common::*;
use serde_json::json;

// ── Helpers ─────────────────────────────────────────────────────────────

fn kpi(category: KpiCategory, display_category: &str, metrics: &[&str]) -> KpiQuery {
    KpiQuery {
        category,
        display_category: display_category.to_string(),
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        filters: vec![],
        group_by: vec![],
        group_by_timestamp: None,
        from: ts(2023, 1, 1, 0, 0),
        to: ts(2023, 1, 3, 23, 59),
        timezone: "UTC".to_string(),
        alias_name: None,
    }
}

fn daily(mut q: KpiQuery) -> KpiQuery {
    q.group_by_timestamp = Some(GroupByTimestamp::Date);
    q
}

fn group(queries: Vec<KpiQuery>) -> KpiQueryGroup {
    KpiQueryGroup {
        queries,
        ..Default::default()
    }
}

fn day_of(cell: &Cell) -> String {
    match cell {
        Cell::Timestamp(dt) => dt.format("%Y-%m-%d").to_string(),
        other => panic!("expected a timestamp bucket, got {other:?}"),
    }
}

fn event(store: &AnalyticsStore, name: &str, user: &str, at: i64, properties: serde_json::Value) {
    store
        .insert_event(PROJECT, name, user, at, &properties)
        .expect("insert event");
}

/// Event executor that fails every query.
struct FailingEvents;

impl EventQueryExecutor for FailingEvents {
    fn execute_event_query(&self, _: ProjectId, _: &EventQuery) -> EngineResult<QueryResult> {
        Err(EngineError::Other(anyhow::anyhow!("event backend unavailable")))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[test]
fn daily_channel_and_event_kpis_merge_with_zero_fill() {
    let store = seeded_store();
    event(&store, "$page_view", "u1", ts(2023, 1, 2, 9, 0), json!({}));
    event(&store, "$page_view", "u2", ts(2023, 1, 2, 10, 0), json!({}));
    event(&store, "$page_view", "u1", ts(2023, 1, 3, 11, 0), json!({}));
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let g = group(vec![
        daily(kpi(KpiCategory::Channels, "google_ads_metrics", &["impressions"])),
        daily(kpi(KpiCategory::Events, "page_views", &["page_views"])),
    ]);
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-kpi");
    assert_eq!(status, QueryStatus::Ok);
    assert_eq!(results.len(), 1);

    let merged = &results[0];
    assert_eq!(
        merged.headers,
        vec!["datetime", "google_ads_metrics_impressions", "page_views"]
    );
    let days: Vec<String> = merged.rows.iter().map(|r| day_of(&r[0])).collect();
    assert_eq!(days, vec!["2023-01-01", "2023-01-02", "2023-01-03"]);
    assert_eq!(merged.rows[0][1..], [Cell::Int(100), Cell::Int(0)]);
    assert_eq!(merged.rows[1][1..], [Cell::Int(90), Cell::Int(2)]);
    assert_eq!(merged.rows[2][1..], [Cell::Int(0), Cell::Int(1)]);
}

#[test]
fn bucketed_and_total_kpis_come_back_separately() {
    let store = seeded_store();
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let g = group(vec![
        kpi(KpiCategory::Channels, "all_channels_metrics", &["clicks"]),
        daily(kpi(KpiCategory::Channels, "facebook_metrics", &["impressions"])),
    ]);
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-split");
    assert_eq!(status, QueryStatus::Ok);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].headers, vec!["all_channels_metrics_clicks"]);
    assert_eq!(results[0].rows, vec![vec![Cell::Int(19)]]);
    assert!(results[1].is_time_bucketed());
    assert_eq!(results[1].headers[1], "facebook_metrics_impressions");
}

#[test]
fn event_buckets_follow_the_tenant_zone_when_corrected() {
    // 2023-01-01T19:00:00Z is already 2023-01-02 in Kolkata.
    let at = 1_672_599_600;

    let store = empty_store();
    integrate(&store, "Asia/Kolkata", true, &[]);
    event(&store, "$page_view", "u1", at, json!({}));
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let g = group(vec![daily(kpi(KpiCategory::Events, "page_views", &["page_views"]))]);
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-tz");
    assert_eq!(status, QueryStatus::Ok);
    let row = &results[0].rows[0];
    match &row[0] {
        Cell::Timestamp(dt) => assert_eq!(dt.to_rfc3339(), "2023-01-02T00:00:00+05:30"),
        other => panic!("expected timestamp, got {other:?}"),
    }
    assert_eq!(row[1], Cell::Int(1));

    let plain = empty_store();
    integrate(&plain, "Asia/Kolkata", false, &[]);
    event(&plain, "$page_view", "u1", at, json!({}));
    let engine = QueryEngine::new(&config, &plain);
    let (results, _) = engine.execute_kpi_group(PROJECT, &g, "req-tz-off");
    assert_eq!(day_of(&results[0].rows[0][0]), "2023-01-01");
}

#[test]
fn day_starting_in_a_dst_gap_still_buckets_as_a_timestamp() {
    // Sao Paulo clocks jumped from 00:00 to 01:00 on 2018-11-04.
    let store = empty_store();
    integrate(&store, "UTC", false, &[]);
    event(&store, "$page_view", "u1", ts(2018, 11, 4, 15, 0), json!({}));
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let mut q = daily(kpi(KpiCategory::Events, "page_views", &["page_views"]));
    q.from = ts(2018, 11, 3, 0, 0);
    q.to = ts(2018, 11, 5, 23, 59);
    q.timezone = "America/Sao_Paulo".into();
    let (results, status) = engine.execute_kpi_group(PROJECT, &group(vec![q]), "req-dst");
    assert_eq!(status, QueryStatus::Ok);
    assert_eq!(results[0].rows.len(), 1);
    match &results[0].rows[0][0] {
        Cell::Timestamp(dt) => assert_eq!(dt.to_rfc3339(), "2018-11-04T01:00:00-02:00"),
        other => panic!("expected timestamp, got {other:?}"),
    }
    assert_eq!(results[0].rows[0][1], Cell::Int(1));
}

#[test]
fn multi_step_transformations_combine_sub_queries() {
    let store = empty_store();
    integrate(&store, "UTC", false, &[]);
    let day = ts(2023, 1, 1, 12, 0);
    event(&store, "$session", "u1", day, json!({"spent_time": 30, "page_count": 4}));
    event(&store, "$session", "u1", day + 60, json!({"spent_time": 5, "page_count": 1}));
    event(&store, "$session", "u2", day + 120, json!({"spent_time": 12, "page_count": 1}));
    event(&store, "$session", "u3", day + 180, json!({"spent_time": 1, "page_count": 1}));
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let g = group(vec![kpi(
        KpiCategory::Events,
        "website_session",
        &["total_sessions", "engagement_rate", "sessions_per_user", "avg_session_duration"],
    )]);
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-steps");
    assert_eq!(status, QueryStatus::Ok);
    let r = &results[0];
    assert_eq!(
        r.headers,
        vec!["total_sessions", "engagement_rate", "sessions_per_user", "avg_session_duration"]
    );
    assert_eq!(r.rows[0][0], Cell::Int(4));
    // Two engaged sessions of four.
    assert_eq!(r.rows[0][1], Cell::Int(50));
    assert_eq!(r.rows[0][2].as_f64(), 4.0 / 3.0);
    assert_eq!(r.rows[0][3], Cell::Int(12));
}

#[test]
fn derived_kpis_are_computed_from_group_members() {
    let store = empty_store();
    integrate(&store, "UTC", false, &[]);
    let day = ts(2023, 1, 1, 12, 0);
    for (user, n) in [("u1", 3), ("u2", 1)] {
        for i in 0..n {
            event(&store, "$page_view", user, day + i, json!({}));
        }
    }
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let mut g = group(vec![kpi(KpiCategory::Events, "page_views", &["page_views", "unique_users"])]);
    g.derived.push(DerivedKpi {
        name: "views_per_visitor".into(),
        formula: "page_views / unique_users".into(),
    });
    g.derived.push(DerivedKpi {
        name: "broken".into(),
        formula: "page_views / not_in_group".into(),
    });
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-derived");
    assert_eq!(status, QueryStatus::PartialContent);
    let r = &results[0];
    assert_eq!(r.headers, vec!["page_views", "unique_users", "views_per_visitor"]);
    assert_eq!(r.rows, vec![vec![Cell::Int(4), Cell::Int(2), Cell::Int(2)]]);
}

#[test]
fn global_filters_apply_to_every_member() {
    let store = empty_store();
    integrate(&store, "UTC", false, &[]);
    store.insert_profile(PROJECT, "u1", 0, &json!({"country": "IN"})).expect("profile");
    store.insert_profile(PROJECT, "u2", 0, &json!({"country": "US"})).expect("profile");
    let day = ts(2023, 1, 1, 12, 0);
    event(&store, "$page_view", "u1", day, json!({}));
    event(&store, "$page_view", "u2", day, json!({}));
    event(&store, "$form_submitted", "u1", day, json!({}));
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let mut g = group(vec![
        kpi(KpiCategory::Events, "page_views", &["page_views"]),
        kpi(KpiCategory::Events, "form_submission", &["count"]),
    ]);
    g.global_filters.push(KpiFilter {
        object: "user".into(),
        property: "country".into(),
        condition: FilterCondition::Equals,
        value: "IN".into(),
        logical_op: LogicalOp::And,
    });
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-global");
    assert_eq!(status, QueryStatus::Ok);
    assert_eq!(results[0].rows, vec![vec![Cell::Int(1), Cell::Int(1)]]);
}

#[test]
fn failed_members_are_dropped_and_degrade_status() {
    let store = seeded_store();
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store).with_event_executor(&FailingEvents);

    let g = group(vec![
        kpi(KpiCategory::Channels, "google_ads_metrics", &["clicks"]),
        kpi(KpiCategory::Events, "page_views", &["page_views"]),
        kpi(KpiCategory::Events, "website_session", &["no_such_metric"]),
    ]);
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-fail");
    assert_eq!(status, QueryStatus::InternalError);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].headers, vec!["google_ads_metrics_clicks"]);
    assert_eq!(results[0].rows, vec![vec![Cell::Int(12)]]);
}

#[test]
fn all_members_failing_returns_the_error_marker() {
    let store = seeded_store();
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let g = group(vec![kpi(KpiCategory::Events, "website_session", &["no_such_metric"])]);
    let (results, status) = engine.execute_kpi_group(PROJECT, &g, "req-all-fail");
    assert_eq!(status, QueryStatus::BadRequest);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_error());
}

#[test]
fn unintegrated_channel_kpi_contributes_nothing() {
    let store = empty_store();
    integrate(&store, "UTC", false, &[(Channel::SocialAds, "act-1")]);
    let config = EngineConfig::default_test();
    let engine = QueryEngine::new(&config, &store);

    let mut q = kpi(KpiCategory::Channels, "linkedin_metrics", &["clicks"]);
    q.alias_name = Some("li_clicks".into());
    let (results, status) = engine.execute_kpi_group(PROJECT, &group(vec![q]), "req-li");
    assert_eq!(status, QueryStatus::Ok);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].headers, vec!["li_clicks"]);
    assert!(results[0].rows.is_empty());
}
