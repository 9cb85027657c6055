//! KPI execution: channel KPIs route to the channel engine, event KPIs run
//! one or more event sub-queries and combine them, profile KPIs delegate to
//! the profile executor. Group results are split by time bucketing and merged.

pub mod execute;
pub mod formula;
pub mod merge;
pub mod transform;

use crate::query::{GroupByTimestamp, KpiFilter, KpiGroupBy};
use crate::types::UnixTime;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// How an event sub-query aggregates matching events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "property", rename_all = "snake_case")]
pub enum EventAggregate {
    CountEvents,
    CountUsers,
    SumProperty(Cow<'static, str>),
}

/// Internal analytics query handed to an [`EventQueryExecutor`].
///
/// Results put the bucket first (when bucketed), then one column per
/// group-by property, then `metric_name`.
///
/// [`EventQueryExecutor`]: crate::integration::EventQueryExecutor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    pub event_name: String,
    pub aggregate: EventAggregate,
    pub filters: Vec<KpiFilter>,
    pub group_by: Vec<KpiGroupBy>,
    pub group_by_timestamp: Option<GroupByTimestamp>,
    pub from: UnixTime,
    pub to: UnixTime,
    pub timezone: String,
    pub metric_name: String,
}
