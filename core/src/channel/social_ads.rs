//! Social advertising insights (`facebook_ads`).

use super::document::{Aggregate, ChannelSchema, MetricSpec, ObjectSpec};
use super::ChannelSqlBuilder;
use crate::query::Channel;

pub struct SocialAdsBuilder;

impl ChannelSqlBuilder for SocialAdsBuilder {
    fn schema(&self) -> &'static ChannelSchema {
        &SCHEMA
    }
}

pub static SCHEMA: ChannelSchema = ChannelSchema {
    channel: Channel::SocialAds,
    table: "facebook_documents",
    account_column: "customer_ad_account_id",
    default_report: "campaign_insights",
    objects: &[
        ObjectSpec {
            name: "campaign",
            report: "campaign_insights",
            level: 1,
            id_column: Some("campaign_id"),
            key_prefix: "campaign",
            properties: &["id", "name", "objective", "status"],
        },
        ObjectSpec {
            name: "ad_set",
            report: "ad_set_insights",
            level: 2,
            id_column: Some("ad_set_id"),
            key_prefix: "ad_set",
            properties: &["id", "name", "status"],
        },
        ObjectSpec {
            name: "ad",
            report: "ad_insights",
            level: 3,
            id_column: Some("ad_id"),
            key_prefix: "ad",
            properties: &["id", "name", "status"],
        },
    ],
    metrics: &[
        MetricSpec { name: "impressions", aggregate: Aggregate::Sum("impressions") },
        MetricSpec { name: "clicks", aggregate: Aggregate::Sum("clicks") },
        MetricSpec { name: "spend", aggregate: Aggregate::Sum("spend") },
        MetricSpec { name: "reach", aggregate: Aggregate::Sum("reach") },
        MetricSpec {
            name: "frequency",
            aggregate: Aggregate::Ratio { num: "impressions", den: "reach", scale: "1.0" },
        },
        MetricSpec {
            name: "click_through_rate",
            aggregate: Aggregate::Ratio { num: "clicks", den: "impressions", scale: "100.0" },
        },
        MetricSpec {
            name: "cost_per_click",
            aggregate: Aggregate::Ratio { num: "spend", den: "clicks", scale: "1.0" },
        },
        MetricSpec {
            name: "cost_per_thousand_impressions",
            aggregate: Aggregate::Ratio { num: "spend", den: "impressions", scale: "1000.0" },
        },
        MetricSpec {
            name: "video_p50_watched_actions",
            aggregate: Aggregate::Sum("video_p50_watched_actions"),
        },
    ],
    ascending_metrics: &["cost_per_click", "cost_per_thousand_impressions"],
    union_objects: &[("campaign", "campaign"), ("ad_group", "ad_set")],
};
