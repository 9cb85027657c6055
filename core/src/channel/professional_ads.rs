//! Professional network advertising (`linkedin_ads`). Campaign groups sit
//! above campaigns, so in the all-channels union they play the campaign role.

use super::document::{Aggregate, ChannelSchema, MetricSpec, ObjectSpec};
use super::ChannelSqlBuilder;
use crate::query::Channel;

pub struct ProfessionalAdsBuilder;

impl ChannelSqlBuilder for ProfessionalAdsBuilder {
    fn schema(&self) -> &'static ChannelSchema {
        &SCHEMA
    }
}

pub static SCHEMA: ChannelSchema = ChannelSchema {
    channel: Channel::ProfessionalAds,
    table: "linkedin_documents",
    account_column: "customer_ad_account_id",
    default_report: "campaign_group_insights",
    objects: &[
        ObjectSpec {
            name: "campaign_group",
            report: "campaign_group_insights",
            level: 1,
            id_column: Some("campaign_group_id"),
            key_prefix: "campaign_group",
            properties: &["id", "name", "status"],
        },
        ObjectSpec {
            name: "campaign",
            report: "campaign_insights",
            level: 2,
            id_column: Some("campaign_id"),
            key_prefix: "campaign",
            properties: &["id", "name", "type", "status"],
        },
        ObjectSpec {
            name: "creative",
            report: "creative_insights",
            level: 3,
            id_column: Some("creative_id"),
            key_prefix: "creative",
            properties: &["id", "type", "status"],
        },
        ObjectSpec {
            name: "company",
            report: "member_company_insights",
            level: 3,
            id_column: Some("company_id"),
            key_prefix: "company",
            properties: &["id", "name", "domain", "headcount"],
        },
    ],
    metrics: &[
        MetricSpec { name: "impressions", aggregate: Aggregate::Sum("impressions") },
        MetricSpec { name: "clicks", aggregate: Aggregate::Sum("clicks") },
        MetricSpec { name: "spend", aggregate: Aggregate::Sum("costInLocalCurrency") },
        MetricSpec {
            name: "conversions",
            aggregate: Aggregate::Sum("externalWebsiteConversions"),
        },
        MetricSpec {
            name: "click_through_rate",
            aggregate: Aggregate::Ratio { num: "clicks", den: "impressions", scale: "100.0" },
        },
        MetricSpec {
            name: "cost_per_click",
            aggregate: Aggregate::Ratio { num: "costInLocalCurrency", den: "clicks", scale: "1.0" },
        },
        MetricSpec {
            name: "approximate_unique_impressions",
            aggregate: Aggregate::Sum("approximateUniqueImpressions"),
        },
    ],
    ascending_metrics: &["cost_per_click"],
    union_objects: &[("campaign", "campaign_group"), ("ad_group", "campaign")],
};
