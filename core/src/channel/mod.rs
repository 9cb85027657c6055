//! Channel SQL builders.
//!
//! RULES:
//!   - One builder per source channel, registered in `BUILDERS`.
//!   - Builders only synthesize SQL. Execution, routing and normalization
//!     belong to the router and the all-channels aggregator.
//!   - Builders never fail on an unknown metric; they project NULL for it.

pub mod all_channels;
pub mod document;
pub mod organic_search;
pub mod paid_search;
pub mod professional_ads;
pub mod router;
pub mod social_ads;

use crate::error::EngineResult;
use crate::integration::TenantSettings;
use crate::query::{Channel, ChannelQuery};
use document::{BuildOptions, BuildOutcome, ChannelSchema};
use serde::{Deserialize, Serialize};

/// Every channel builder implements this trait.
pub trait ChannelSqlBuilder: Send + Sync {
    fn schema(&self) -> &'static ChannelSchema;

    fn channel(&self) -> Channel {
        self.schema().channel
    }

    fn build(
        &self,
        query: &ChannelQuery,
        tenant: &TenantSettings,
        opts: &BuildOptions,
    ) -> EngineResult<BuildOutcome> {
        document::build_query(self.schema(), query, tenant, opts)
    }

    fn build_filter_values(
        &self,
        object: &str,
        property: &str,
        tenant: &TenantSettings,
        union_member: bool,
        limit: Option<usize>,
    ) -> EngineResult<BuildOutcome> {
        document::build_filter_values(self.schema(), object, property, tenant, union_member, limit)
    }

    /// Static part of the channel's selectable catalog.
    fn config(&self) -> ChannelConfig {
        let schema = self.schema();
        ChannelConfig {
            channel: schema.channel.as_str().to_string(),
            metrics: schema.metrics.iter().map(|m| m.name.to_string()).collect(),
            objects: schema
                .objects
                .iter()
                .map(|o| ChannelObjectConfig {
                    name: o.name.to_string(),
                    properties: o
                        .properties
                        .iter()
                        .map(|p| PropertyConfig::categorical(p))
                        .collect(),
                })
                .collect(),
        }
    }
}

static BUILDERS: &[(Channel, &dyn ChannelSqlBuilder)] = &[
    (Channel::PaidSearch, &paid_search::PaidSearchBuilder),
    (Channel::SocialAds, &social_ads::SocialAdsBuilder),
    (Channel::ProfessionalAds, &professional_ads::ProfessionalAdsBuilder),
    (Channel::OrganicSearch, &organic_search::OrganicSearchBuilder),
];

/// Builder for a single source channel. `AllChannels` has none; it is served
/// by the union aggregator.
pub fn builder_for(channel: Channel) -> Option<&'static dyn ChannelSqlBuilder> {
    BUILDERS
        .iter()
        .find(|(c, _)| *c == channel)
        .map(|(_, builder)| *builder)
}

// ── Catalog ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    pub data_type: String,
}

impl PropertyConfig {
    pub fn categorical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: "categorical".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelObjectConfig {
    pub name: String,
    pub properties: Vec<PropertyConfig>,
}

/// Selectable metrics and breakdown objects for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: String,
    pub metrics: Vec<String>,
    pub objects: Vec<ChannelObjectConfig>,
}

impl ChannelConfig {
    /// Append tenant-defined properties to `object`, skipping names it
    /// already has.
    pub fn merge_smart_properties<'a>(
        &mut self,
        object: &str,
        properties: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) {
        let Some(target) = self.objects.iter_mut().find(|o| o.name == object) else {
            return;
        };
        for (name, data_type) in properties {
            if target.properties.iter().any(|p| &p.name == name) {
                continue;
            }
            target.properties.push(PropertyConfig {
                name: name.clone(),
                data_type: data_type.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn every_source_channel_has_a_builder() {
        for channel in [
            Channel::PaidSearch,
            Channel::SocialAds,
            Channel::ProfessionalAds,
            Channel::OrganicSearch,
        ] {
            let builder = builder_for(channel).expect("registered");
            assert_eq!(builder.channel(), channel);
        }
        assert!(builder_for(Channel::AllChannels).is_none());
    }

    #[test]
    fn union_objects_resolve_to_real_objects() {
        for channel in crate::query::UNION_CHANNELS {
            let schema = builder_for(channel).unwrap().schema();
            for (common, own) in schema.union_objects {
                assert!(
                    schema.object(own).is_some(),
                    "{channel}: union object {common} maps to missing {own}"
                );
            }
            for metric in all_channels::UNION_METRICS {
                assert!(schema.metric(metric).is_some(), "{channel} lacks {metric}");
            }
        }
    }

    #[test]
    fn smart_properties_merge_without_duplicates() {
        let mut config = paid_search::PaidSearchBuilder.config();
        let mut smart = BTreeMap::new();
        smart.insert("name".to_string(), "categorical".to_string());
        smart.insert("region".to_string(), "categorical".to_string());
        config.merge_smart_properties("campaign", &smart);
        let campaign = config.objects.iter().find(|o| o.name == "campaign").unwrap();
        assert_eq!(campaign.properties.iter().filter(|p| p.name == "name").count(), 1);
        assert!(campaign.properties.iter().any(|p| p.name == "region"));
    }
}
