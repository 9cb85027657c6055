//! Request model for channel and KPI queries.
//!
//! Everything here is constructed per request from JSON and never persisted.
//! Validation that needs no tenant context (channel ids, filter objects,
//! identifier shapes) lives here so it runs before any SQL is built.

use crate::error::{EngineError, EngineResult};
use crate::types::{is_identifier, UnixTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Channels ──────────────────────────────────────────────────────────

/// Closed set of channels the engine can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "google_ads")]
    PaidSearch,
    #[serde(rename = "facebook_ads")]
    SocialAds,
    #[serde(rename = "linkedin_ads")]
    ProfessionalAds,
    #[serde(rename = "search_console")]
    OrganicSearch,
    #[serde(rename = "all_ads")]
    AllChannels,
}

/// Channels that take part in the all-channels union, in union order.
pub const UNION_CHANNELS: [Channel; 3] = [
    Channel::PaidSearch,
    Channel::SocialAds,
    Channel::ProfessionalAds,
];

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::PaidSearch => "google_ads",
            Channel::SocialAds => "facebook_ads",
            Channel::ProfessionalAds => "linkedin_ads",
            Channel::OrganicSearch => "search_console",
            Channel::AllChannels => "all_ads",
        }
    }

    /// Names a `channel` filter value may match against. The first entry is
    /// what a `channel.name` breakdown projects.
    pub fn display_names(self) -> &'static [&'static str] {
        match self {
            Channel::PaidSearch => &["Google Ads", "google_ads"],
            Channel::SocialAds => &["Facebook Ads", "facebook_ads"],
            Channel::ProfessionalAds => &["LinkedIn Ads", "linkedin_ads"],
            Channel::OrganicSearch => &["Search Console", "search_console"],
            Channel::AllChannels => &["All Channels", "all_ads"],
        }
    }

    pub fn display_name(self) -> &'static str {
        self.display_names()[0]
    }
}

impl FromStr for Channel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_ads" => Ok(Channel::PaidSearch),
            "facebook_ads" => Ok(Channel::SocialAds),
            "linkedin_ads" => Ok(Channel::ProfessionalAds),
            "search_console" => Ok(Channel::OrganicSearch),
            "all_ads" => Ok(Channel::AllChannels),
            other => Err(EngineError::UnknownChannel {
                channel: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Objects a filter or breakdown may reference, across all channels.
pub const FILTER_OBJECTS: &[&str] = &[
    "campaign",
    "ad_group",
    "ad",
    "keyword",
    "query",
    "ad_set",
    "campaign_group",
    "creative",
    "organic_property",
    "channel",
    "company",
];

/// Pseudo object whose filters route the all-channels union.
pub const CHANNEL_OBJECT: &str = "channel";

// ── Filters and breakdowns ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogicalOp {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl LogicalOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub object: String,
    pub property: String,
    pub condition: FilterCondition,
    pub value: String,
    /// Joins this filter to the previous one. Ignored on the first filter.
    #[serde(default)]
    pub logical_op: LogicalOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelGroupBy {
    pub object: String,
    pub property: String,
}

impl ChannelGroupBy {
    /// Column name of this breakdown in results: `object_property`.
    pub fn key_name(&self) -> String {
        format!("{}_{}", self.object, self.property)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupByTimestamp {
    Hour,
    Date,
    Week,
    Month,
    Quarter,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

// ── Channel queries ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelQuery {
    /// Raw channel id; parsed by the router so unknown ids are rejected there.
    pub channel: String,
    #[serde(default)]
    pub filters: Vec<ChannelFilter>,
    #[serde(default)]
    pub group_by: Vec<ChannelGroupBy>,
    #[serde(default)]
    pub metrics: Vec<String>,
    pub from: UnixTime,
    pub to: UnixTime,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub group_by_timestamp: Option<GroupByTimestamp>,
}

impl ChannelQuery {
    /// Checks object names and identifier shapes. Channel-specific support for
    /// an object is checked later by that channel's builder.
    pub fn validate(&self) -> EngineResult<()> {
        for object in self
            .filters
            .iter()
            .map(|f| f.object.as_str())
            .chain(self.group_by.iter().map(|g| g.object.as_str()))
        {
            if !FILTER_OBJECTS.contains(&object) {
                return Err(EngineError::UnknownFilterObject {
                    channel: self.channel.clone(),
                    object: object.to_string(),
                });
            }
        }
        for property in self
            .filters
            .iter()
            .map(|f| f.property.as_str())
            .chain(self.group_by.iter().map(|g| g.property.as_str()))
        {
            if !is_identifier(property) {
                return Err(EngineError::InvalidQuery(format!(
                    "invalid property name '{property}'"
                )));
            }
        }
        if let Some(metric) = self.metrics.iter().find(|m| !is_identifier(m)) {
            return Err(EngineError::InvalidQuery(format!(
                "invalid metric name '{metric}'"
            )));
        }
        if self.from > self.to {
            return Err(EngineError::InvalidQuery(format!(
                "from {} is after to {}",
                self.from, self.to
            )));
        }
        Ok(())
    }

    /// Filters on the `channel` pseudo object, in request order.
    pub fn channel_filters(&self) -> Vec<ChannelFilter> {
        self.filters
            .iter()
            .filter(|f| f.object == CHANNEL_OBJECT)
            .cloned()
            .collect()
    }

    /// Filters applied to report documents.
    pub fn document_filters(&self) -> Vec<ChannelFilter> {
        self.filters
            .iter()
            .filter(|f| f.object != CHANNEL_OBJECT)
            .cloned()
            .collect()
    }

    pub fn has_breakdown(&self) -> bool {
        !self.group_by.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelQueryGroup {
    pub queries: Vec<ChannelQuery>,
}

impl ChannelQueryGroup {
    /// Key for an external result cache. Queries differing only in their time
    /// range share a key.
    pub fn cache_key(&self) -> EngineResult<String> {
        let mut stripped = self.clone();
        for q in &mut stripped.queries {
            q.from = 0;
            q.to = 0;
        }
        Ok(format!("channel_group:{}", serde_json::to_string(&stripped)?))
    }
}

// ── KPI queries ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiCategory {
    Channels,
    Events,
    Profiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiFilter {
    /// Channel object for channel KPIs; `event` or `user` for event KPIs.
    pub object: String,
    pub property: String,
    pub condition: FilterCondition,
    pub value: String,
    #[serde(default)]
    pub logical_op: LogicalOp,
}

impl From<&KpiFilter> for ChannelFilter {
    fn from(f: &KpiFilter) -> Self {
        ChannelFilter {
            object: f.object.clone(),
            property: f.property.clone(),
            condition: f.condition,
            value: f.value.clone(),
            logical_op: f.logical_op,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KpiGroupBy {
    pub object: String,
    pub property: String,
}

impl From<&KpiGroupBy> for ChannelGroupBy {
    fn from(g: &KpiGroupBy) -> Self {
        ChannelGroupBy {
            object: g.object.clone(),
            property: g.property.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiQuery {
    pub category: KpiCategory,
    pub display_category: String,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filters: Vec<KpiFilter>,
    #[serde(default)]
    pub group_by: Vec<KpiGroupBy>,
    #[serde(default)]
    pub group_by_timestamp: Option<GroupByTimestamp>,
    pub from: UnixTime,
    pub to: UnixTime,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub alias_name: Option<String>,
}

impl KpiQuery {
    /// Result column name for `metric`.
    pub fn header_name(&self, metric: &str) -> String {
        if let Some(alias) = self.alias_name.as_ref().filter(|a| !a.is_empty()) {
            return alias.clone();
        }
        match self.category {
            KpiCategory::Channels => format!("{}_{}", self.display_category, metric),
            _ => metric.to_string(),
        }
    }

    /// Copy of this query restricted to one metric.
    pub fn for_metric(&self, metric: &str) -> KpiQuery {
        KpiQuery {
            metrics: vec![metric.to_string()],
            ..self.clone()
        }
    }
}

/// Named arithmetic over other KPI results in the same group, e.g.
/// `total_sessions / unique_users`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedKpi {
    pub name: String,
    pub formula: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiQueryGroup {
    pub queries: Vec<KpiQuery>,
    #[serde(default)]
    pub global_filters: Vec<KpiFilter>,
    #[serde(default)]
    pub global_group_by: Vec<KpiGroupBy>,
    #[serde(default)]
    pub derived: Vec<DerivedKpi>,
}

impl KpiQueryGroup {
    /// Member queries with global filters appended and, when present, the
    /// global group-by replacing each query's own.
    pub fn with_globals_applied(&self) -> Vec<KpiQuery> {
        self.queries
            .iter()
            .map(|q| {
                let mut q = q.clone();
                q.filters.extend(self.global_filters.iter().cloned());
                if !self.global_group_by.is_empty() {
                    q.group_by = self.global_group_by.clone();
                }
                q
            })
            .collect()
    }

    pub fn cache_key(&self) -> EngineResult<String> {
        let mut stripped = self.clone();
        for q in &mut stripped.queries {
            q.from = 0;
            q.to = 0;
        }
        Ok(format!("kpi_group:{}", serde_json::to_string(&stripped)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(channel: &str) -> ChannelQuery {
        ChannelQuery {
            channel: channel.to_string(),
            filters: vec![],
            group_by: vec![],
            metrics: vec!["impressions".into()],
            from: 1_672_531_200,
            to: 1_672_790_399,
            timezone: "UTC".into(),
            group_by_timestamp: None,
        }
    }

    #[test]
    fn channel_ids_round_trip_through_from_str() {
        for c in [
            Channel::PaidSearch,
            Channel::SocialAds,
            Channel::ProfessionalAds,
            Channel::OrganicSearch,
            Channel::AllChannels,
        ] {
            assert_eq!(c.as_str().parse::<Channel>().unwrap(), c);
        }
        assert!("bing_ads".parse::<Channel>().is_err());
    }

    #[test]
    fn logical_op_defaults_to_and() {
        let f: ChannelFilter = serde_json::from_str(
            r#"{"object":"campaign","property":"name","condition":"equals","value":"x"}"#,
        )
        .unwrap();
        assert_eq!(f.logical_op, LogicalOp::And);
    }

    #[test]
    fn validate_rejects_unknown_object_and_bad_identifiers() {
        let mut q = query("google_ads");
        q.group_by.push(ChannelGroupBy {
            object: "placement".into(),
            property: "name".into(),
        });
        assert!(matches!(
            q.validate(),
            Err(EngineError::UnknownFilterObject { .. })
        ));

        let mut q = query("google_ads");
        q.metrics.push("clicks; DROP TABLE x".into());
        assert!(matches!(q.validate(), Err(EngineError::InvalidQuery(_))));
    }

    #[test]
    fn globals_are_applied_to_every_member() {
        let member = KpiQuery {
            category: KpiCategory::Events,
            display_category: "website_session".into(),
            metrics: vec!["total_sessions".into()],
            filters: vec![],
            group_by: vec![KpiGroupBy {
                object: "event".into(),
                property: "page".into(),
            }],
            group_by_timestamp: None,
            from: 0,
            to: 10,
            timezone: "UTC".into(),
            alias_name: None,
        };
        let group = KpiQueryGroup {
            queries: vec![member.clone(), member],
            global_filters: vec![KpiFilter {
                object: "user".into(),
                property: "country".into(),
                condition: FilterCondition::Equals,
                value: "IN".into(),
                logical_op: LogicalOp::And,
            }],
            global_group_by: vec![KpiGroupBy {
                object: "user".into(),
                property: "country".into(),
            }],
            derived: vec![],
        };
        for q in group.with_globals_applied() {
            assert_eq!(q.filters.len(), 1);
            assert_eq!(q.group_by[0].property, "country");
        }
    }

    #[test]
    fn cache_key_ignores_time_range() {
        let mut a = ChannelQueryGroup {
            queries: vec![query("google_ads")],
        };
        let key_a = a.cache_key().unwrap();
        a.queries[0].from += 86_400;
        assert_eq!(key_a, a.cache_key().unwrap());
        a.queries[0].metrics.push("clicks".into());
        assert_ne!(key_a, a.cache_key().unwrap());
    }

    #[test]
    fn header_names_follow_category() {
        let mut q = KpiQuery {
            category: KpiCategory::Channels,
            display_category: "google_ads_metrics".into(),
            metrics: vec!["clicks".into()],
            filters: vec![],
            group_by: vec![],
            group_by_timestamp: None,
            from: 0,
            to: 1,
            timezone: "UTC".into(),
            alias_name: None,
        };
        assert_eq!(q.header_name("clicks"), "google_ads_metrics_clicks");
        q.alias_name = Some("paid_clicks".into());
        assert_eq!(q.header_name("clicks"), "paid_clicks");
        q.alias_name = None;
        q.category = KpiCategory::Events;
        assert_eq!(q.header_name("clicks"), "clicks");
    }
}
