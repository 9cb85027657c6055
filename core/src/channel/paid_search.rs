//! Paid search reports (`google_ads`).

use super::document::{Aggregate, ChannelSchema, MetricSpec, ObjectSpec};
use super::ChannelSqlBuilder;
use crate::query::Channel;

pub struct PaidSearchBuilder;

impl ChannelSqlBuilder for PaidSearchBuilder {
    fn schema(&self) -> &'static ChannelSchema {
        &SCHEMA
    }
}

pub static SCHEMA: ChannelSchema = ChannelSchema {
    channel: Channel::PaidSearch,
    table: "adwords_documents",
    account_column: "customer_account_id",
    default_report: "campaign_performance_report",
    objects: &[
        ObjectSpec {
            name: "campaign",
            report: "campaign_performance_report",
            level: 1,
            id_column: Some("campaign_id"),
            key_prefix: "campaign",
            properties: &["id", "name", "status", "advertising_channel_type"],
        },
        ObjectSpec {
            name: "ad_group",
            report: "ad_group_performance_report",
            level: 2,
            id_column: Some("ad_group_id"),
            key_prefix: "ad_group",
            properties: &["id", "name", "status"],
        },
        ObjectSpec {
            name: "ad",
            report: "ad_performance_report",
            level: 3,
            id_column: Some("ad_id"),
            key_prefix: "ad",
            properties: &["id", "ad_type", "status"],
        },
        ObjectSpec {
            name: "keyword",
            report: "keyword_performance_report",
            level: 3,
            id_column: Some("keyword_id"),
            key_prefix: "keyword",
            properties: &["id", "text", "match_type", "status"],
        },
        ObjectSpec {
            name: "query",
            report: "search_performance_report",
            level: 3,
            id_column: None,
            key_prefix: "",
            properties: &["query"],
        },
    ],
    metrics: &[
        MetricSpec { name: "impressions", aggregate: Aggregate::Sum("impressions") },
        MetricSpec { name: "clicks", aggregate: Aggregate::Sum("clicks") },
        // Costs are stored in micros.
        MetricSpec {
            name: "spend",
            aggregate: Aggregate::SumScaled { field: "cost", divisor: "1000000.0" },
        },
        MetricSpec { name: "conversions", aggregate: Aggregate::Sum("conversions") },
        MetricSpec { name: "conversion_value", aggregate: Aggregate::Sum("conversion_value") },
        MetricSpec {
            name: "click_through_rate",
            aggregate: Aggregate::Ratio { num: "clicks", den: "impressions", scale: "100.0" },
        },
        MetricSpec {
            name: "cost_per_click",
            aggregate: Aggregate::Ratio { num: "cost", den: "clicks", scale: "0.000001" },
        },
        MetricSpec {
            name: "cost_per_conversion",
            aggregate: Aggregate::Ratio { num: "cost", den: "conversions", scale: "0.000001" },
        },
        MetricSpec {
            name: "conversion_rate",
            aggregate: Aggregate::Ratio { num: "conversions", den: "clicks", scale: "100.0" },
        },
        MetricSpec {
            name: "search_impression_share",
            aggregate: Aggregate::Avg("search_impression_share"),
        },
    ],
    ascending_metrics: &["cost_per_click", "cost_per_conversion"],
    union_objects: &[("campaign", "campaign"), ("ad_group", "ad_group")],
};
