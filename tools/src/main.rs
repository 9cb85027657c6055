//! kpi-runner: run channel and KPI queries against an analytics database.
//!
//! Usage:
//!   kpi-runner --db analytics.db --project 1 --kind kpi --query data/queries/kpi_daily.json
//!   kpi-runner --kind channel --query data/queries/channel_union.json --demo
//!   kpi-runner --kind filter-values --channel all_ads --object campaign --property name --demo
//!   kpi-runner --kind config --channel google_ads --demo

use anyhow::{bail, Result};
use channel_kpi_core::{
    config::EngineConfig,
    engine::QueryEngine,
    integration::TenantSettings,
    query::{Channel, ChannelQuery, ChannelQueryGroup, KpiQueryGroup},
    result::QueryResult,
    status::QueryStatus,
    store::{AnalyticsStore, ChannelDocument},
    types::{new_req_id, ProjectId},
};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;

#[derive(Serialize)]
struct Response<'a> {
    req_id: &'a str,
    status: QueryStatus,
    http_code: u16,
    results: Vec<QueryResult>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let project: ProjectId = parse_arg(&args, "--project", 1);
    let demo = args.iter().any(|a| a == "--demo");
    let db = flag(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag(&args, "--data-dir").unwrap_or("./data");
    let kind = flag(&args, "--kind").unwrap_or("kpi");

    let config = EngineConfig::load(data_dir)?;
    let store = AnalyticsStore::open(db)?.with_default_timezone(&config.default_tenant_timezone);
    store.migrate()?;
    if demo {
        seed_demo(&store, project)?;
    }
    let engine = QueryEngine::new(&config, &store);
    let req_id = new_req_id();
    log::info!("req_id={req_id} project_id={project} kind={kind} db={db}");

    let (results, status) = match kind {
        "kpi" => {
            let group: KpiQueryGroup = read_query(&args)?;
            log::debug!("req_id={req_id} cache_key={}", group.cache_key()?);
            engine.execute_kpi_group(project, &group, &req_id)
        }
        "channel" => {
            let query: ChannelQuery = read_query(&args)?;
            let (result, status) = engine.execute_channel_query(project, &query, &req_id);
            (vec![result], status)
        }
        "channel-group" => {
            let group: ChannelQueryGroup = read_query(&args)?;
            log::debug!("req_id={req_id} cache_key={}", group.cache_key()?);
            engine.run_channel_group(project, &group, &req_id)
        }
        "filter-values" => {
            let channel = required(&args, "--channel")?;
            let object = required(&args, "--object")?;
            let property = required(&args, "--property")?;
            let values = engine.channel_filter_values(project, channel, object, property, &req_id)?;
            println!("{}", serde_json::to_string_pretty(&values)?);
            return Ok(());
        }
        "config" => {
            let channel = required(&args, "--channel")?;
            let channel_config = engine.channel_config(project, channel)?;
            println!("{}", serde_json::to_string_pretty(&channel_config)?);
            return Ok(());
        }
        other => bail!("unknown --kind '{other}' (expected kpi, channel, channel-group, filter-values or config)"),
    };

    let response = Response {
        req_id: &req_id,
        status,
        http_code: status.http_code(),
        results,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn read_query<T: serde::de::DeserializeOwned>(args: &[String]) -> Result<T> {
    let path = required(args, "--query")?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    Ok(serde_json::from_str(&content)?)
}

/// Small fixture tenant: Google and Facebook campaigns plus web sessions for
/// the first week of January 2023.
fn seed_demo(store: &AnalyticsStore, project: ProjectId) -> Result<()> {
    let mut settings = TenantSettings::new(project, "UTC");
    settings.accounts.insert(Channel::PaidSearch, vec!["demo-google".into()]);
    settings.accounts.insert(Channel::SocialAds, vec!["demo-facebook".into()]);
    store.upsert_tenant_settings(&settings)?;

    for day in 1..=7u32 {
        let yyyymmdd = 20230100 + i64::from(day);
        for (campaign, scale) in [("Brand", 3), ("Generic", 1)] {
            store.insert_channel_document(&ChannelDocument {
                channel: Channel::PaidSearch,
                project_id: project,
                account_id: "demo-google".into(),
                doc_type: "campaign_performance_report".into(),
                day: yyyymmdd,
                ids: BTreeMap::from([("campaign_id".to_string(), campaign.to_lowercase())]),
                value: serde_json::json!({
                    "campaign_name": campaign,
                    "impressions": 100 * scale * i64::from(day),
                    "clicks": 4 * scale,
                    "cost": 1_500_000 * scale,
                    "conversions": scale,
                }),
            })?;
        }
        store.insert_channel_document(&ChannelDocument {
            channel: Channel::SocialAds,
            project_id: project,
            account_id: "demo-facebook".into(),
            doc_type: "campaign_insights".into(),
            day: yyyymmdd,
            ids: BTreeMap::from([("campaign_id".to_string(), "retarget".to_string())]),
            value: serde_json::json!({
                "campaign_name": "Retarget",
                "impressions": 250,
                "clicks": 9,
                "spend": 4.2,
            }),
        })?;

        let Some(noon) = NaiveDate::from_ymd_opt(2023, 1, day).and_then(|d| d.and_hms_opt(12, 0, 0))
        else {
            continue;
        };
        let at = Utc.from_utc_datetime(&noon).timestamp();
        for (i, user) in ["u1", "u2", "u3"].iter().enumerate() {
            let spent = 5 + 10 * i as i64;
            store.insert_event(
                project,
                "$session",
                user,
                at + i as i64,
                &serde_json::json!({"spent_time": spent, "page_count": i + 1}),
            )?;
            store.insert_event(project, "$page_view", user, at + i as i64, &serde_json::json!({}))?;
        }
    }
    log::info!("project_id={project} seeded demo data");
    Ok(())
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == name).map(|w| w[1].as_str())
}

fn required<'a>(args: &'a [String], name: &str) -> Result<&'a str> {
    match flag(args, name) {
        Some(value) => Ok(value),
        None => bail!("missing required argument {name}"),
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
