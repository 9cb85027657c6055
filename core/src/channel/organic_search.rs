//! Organic search performance (`search_console`). Documents are keyed by URL
//! prefix rather than an ad account and never join the paid union.

use super::document::{Aggregate, ChannelSchema, MetricSpec, ObjectSpec};
use super::ChannelSqlBuilder;
use crate::query::Channel;

pub struct OrganicSearchBuilder;

impl ChannelSqlBuilder for OrganicSearchBuilder {
    fn schema(&self) -> &'static ChannelSchema {
        &SCHEMA
    }
}

pub static SCHEMA: ChannelSchema = ChannelSchema {
    channel: Channel::OrganicSearch,
    table: "google_organic_documents",
    account_column: "url_prefix",
    default_report: "search_analytics",
    objects: &[ObjectSpec {
        name: "organic_property",
        report: "search_analytics",
        level: 1,
        id_column: None,
        key_prefix: "",
        properties: &["query", "page", "country", "device"],
    }],
    metrics: &[
        MetricSpec { name: "impressions", aggregate: Aggregate::Sum("impressions") },
        MetricSpec { name: "clicks", aggregate: Aggregate::Sum("clicks") },
        MetricSpec {
            name: "click_through_rate",
            aggregate: Aggregate::Ratio { num: "clicks", den: "impressions", scale: "100.0" },
        },
        MetricSpec { name: "position_avg", aggregate: Aggregate::Avg("position") },
        MetricSpec {
            name: "position_impression_weighted_avg",
            aggregate: Aggregate::WeightedAvg { value: "position", weight: "impressions" },
        },
    ],
    // Lower positions rank higher in search results.
    ascending_metrics: &["position_avg", "position_impression_weighted_avg"],
    union_objects: &[],
};
