//! All-channels aggregation: one fragment per implicated paid channel,
//! combined with `UNION ALL` and re-aggregated per metric.

use super::document::{BuildOptions, BuildOutcome, BuiltQuery};
use super::router::{headers_for, normalize};
use super::{builder_for, ChannelConfig, ChannelObjectConfig, PropertyConfig};
use crate::engine::QueryEngine;
use crate::error::{EngineError, EngineResult};
use crate::integration::TenantSettings;
use crate::query::{
    Channel, ChannelFilter, ChannelQuery, FilterCondition, LogicalOp, CHANNEL_OBJECT,
    UNION_CHANNELS,
};
use crate::result::{QueryResult, DATETIME_ALIAS};
use crate::sql::{OrderItem, SelectItem, SelectQuery, SortDirection, Source};
use crate::status::QueryStatus;
use crate::tz::parse_tz;

pub const UNION_ALIAS: &str = "all_ads";

/// Metrics selectable across all channels.
pub const UNION_METRICS: [&str; 3] = ["impressions", "clicks", "spend"];

/// Objects that have a counterpart in every union channel.
pub const UNION_OBJECTS: [&str; 3] = ["campaign", "ad_group", CHANNEL_OBJECT];

/// Operator re-aggregating each metric over the union.
static METRIC_OPERATIONS: &[(&str, &str)] = &[
    ("impressions", "SUM"),
    ("clicks", "SUM"),
    ("spend", "SUM"),
    ("conversions", "SUM"),
];

fn operation_for(metric: &str) -> &'static str {
    METRIC_OPERATIONS
        .iter()
        .find(|(m, _)| *m == metric)
        .map(|(_, op)| *op)
        .unwrap_or("SUM")
}

/// Channels implicated by `channel` filters, in union order. Without channel
/// filters every union channel is implicated.
pub fn required_channels(filters: &[ChannelFilter]) -> Vec<Channel> {
    UNION_CHANNELS
        .into_iter()
        .filter(|channel| passes_channel_filters(*channel, filters))
        .collect()
}

/// Whether `channel` survives the `channel` filters among `filters`. Each
/// filter is matched case-insensitively against the channel's display names;
/// negated conditions exclude matches. Filters chain left to right by their
/// logical operator.
pub fn passes_channel_filters(channel: Channel, filters: &[ChannelFilter]) -> bool {
    let mut included = true;
    for (i, f) in filters.iter().filter(|f| f.object == CHANNEL_OBJECT).enumerate() {
        let value = f.value.to_lowercase();
        let matched = channel
            .display_names()
            .iter()
            .any(|name| name.to_lowercase().contains(&value));
        let passes = match f.condition {
            FilterCondition::Equals | FilterCondition::Contains => matched,
            FilterCondition::NotEquals | FilterCondition::NotContains => !matched,
            FilterCondition::GreaterThan | FilterCondition::LessThan => true,
        };
        included = match (i, f.logical_op) {
            (0, _) => passes,
            (_, LogicalOp::And) => included && passes,
            (_, LogicalOp::Or) => included || passes,
        };
    }
    included
}

/// Outer query over the member fragments. Headers come from the last
/// member; all members are built from the same request so they agree.
pub fn compose_union(members: &[BuiltQuery], limit: usize) -> Option<BuiltQuery> {
    let last = members.last()?;
    let keys = last.keys.clone();
    let metrics = last.metrics.clone();
    let time_bucketed = last.time_bucketed;

    let mut outer = SelectQuery::from_table(UNION_ALIAS);
    if time_bucketed {
        outer.select.push(SelectItem::bare(DATETIME_ALIAS));
        outer.group_by.push(DATETIME_ALIAS.to_string());
        outer.order_by.push(OrderItem {
            expr: DATETIME_ALIAS.to_string(),
            direction: SortDirection::Asc,
        });
    }
    for key in &keys {
        outer.select.push(SelectItem::bare(key.clone()));
        outer.group_by.push(key.clone());
    }
    for metric in &metrics {
        outer.select.push(SelectItem::aliased(
            format!("{}({metric})", operation_for(metric)),
            metric.clone(),
        ));
        outer.order_by.push(OrderItem {
            expr: metric.clone(),
            direction: SortDirection::Desc,
        });
    }
    outer.from = Source::Union {
        members: members.iter().map(|m| m.fragment.clone()).collect(),
        alias: UNION_ALIAS.to_string(),
        distinct: false,
    };
    outer.limit = Some(limit);

    Some(BuiltQuery {
        channel: Channel::AllChannels,
        fragment: outer,
        keys,
        metrics,
        time_bucketed,
    })
}

pub fn all_channels_config() -> ChannelConfig {
    let shared = |name: &str| ChannelObjectConfig {
        name: name.to_string(),
        properties: ["id", "name", "status"]
            .iter()
            .map(|p| PropertyConfig::categorical(p))
            .collect(),
    };
    ChannelConfig {
        channel: Channel::AllChannels.as_str().to_string(),
        metrics: UNION_METRICS.iter().map(|m| m.to_string()).collect(),
        objects: vec![
            shared("campaign"),
            shared("ad_group"),
            ChannelObjectConfig {
                name: CHANNEL_OBJECT.to_string(),
                properties: vec![PropertyConfig::categorical("name")],
            },
        ],
    }
}

impl<'a> QueryEngine<'a> {
    pub(crate) fn execute_all_channels(
        &self,
        query: &ChannelQuery,
        tenant: &TenantSettings,
        req_id: &str,
    ) -> EngineResult<(QueryResult, QueryStatus)> {
        for object in query
            .filters
            .iter()
            .map(|f| f.object.as_str())
            .chain(query.group_by.iter().map(|g| g.object.as_str()))
        {
            if !UNION_OBJECTS.contains(&object) {
                return Err(EngineError::UnknownFilterObject {
                    channel: Channel::AllChannels.as_str().to_string(),
                    object: object.to_string(),
                });
            }
        }

        let report_tz = parse_tz(&self.config.report_timezone)?;
        let opts = BuildOptions::union_member(report_tz);
        let mut members = Vec::new();
        for channel in required_channels(&query.filters) {
            let Some(builder) = builder_for(channel) else { continue };
            match builder.build(query, tenant, &opts)? {
                BuildOutcome::Built(built) => members.push(built),
                BuildOutcome::NotIntegrated => {
                    log::debug!("req_id={req_id} channel={channel} not integrated; left out of union");
                }
            }
        }

        let Some(union) = compose_union(&members, self.config.row_limit) else {
            log::debug!("req_id={req_id} no implicated channel is integrated");
            return Ok((QueryResult::with_headers(headers_for(query)), QueryStatus::Ok));
        };
        let raw = self.run_built(&union, req_id)?;
        Ok((normalize(&union, raw, report_tz)?, QueryStatus::Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_filter(condition: FilterCondition, value: &str, op: LogicalOp) -> ChannelFilter {
        ChannelFilter {
            object: CHANNEL_OBJECT.into(),
            property: "name".into(),
            condition,
            value: value.into(),
            logical_op: op,
        }
    }

    #[test]
    fn no_channel_filters_means_every_channel() {
        assert_eq!(required_channels(&[]), UNION_CHANNELS.to_vec());
    }

    #[test]
    fn equals_matches_display_names_case_insensitively() {
        let f = [channel_filter(FilterCondition::Equals, "google ads", LogicalOp::And)];
        assert_eq!(required_channels(&f), vec![Channel::PaidSearch]);
    }

    #[test]
    fn negation_and_or_chain() {
        let f = [channel_filter(FilterCondition::NotContains, "facebook", LogicalOp::And)];
        assert_eq!(
            required_channels(&f),
            vec![Channel::PaidSearch, Channel::ProfessionalAds]
        );

        let f = [
            channel_filter(FilterCondition::Equals, "linkedin", LogicalOp::And),
            channel_filter(FilterCondition::Equals, "facebook", LogicalOp::Or),
        ];
        assert_eq!(
            required_channels(&f),
            vec![Channel::SocialAds, Channel::ProfessionalAds]
        );

        let f = [
            channel_filter(FilterCondition::Contains, "ads", LogicalOp::And),
            channel_filter(FilterCondition::NotEquals, "google", LogicalOp::And),
        ];
        assert_eq!(
            required_channels(&f),
            vec![Channel::SocialAds, Channel::ProfessionalAds]
        );
    }

    #[test]
    fn single_channels_are_checked_against_channel_filters() {
        let f = [channel_filter(FilterCondition::Equals, "Facebook Ads", LogicalOp::And)];
        assert!(!passes_channel_filters(Channel::PaidSearch, &f));
        assert!(passes_channel_filters(Channel::SocialAds, &f));
        let f = [channel_filter(FilterCondition::Contains, "search console", LogicalOp::And)];
        assert!(passes_channel_filters(Channel::OrganicSearch, &f));
        assert!(passes_channel_filters(Channel::OrganicSearch, &[]));
    }

    #[test]
    fn compose_of_nothing_is_none() {
        assert!(compose_union(&[], 10).is_none());
    }
}
