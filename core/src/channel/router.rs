//! Channel query routing: validation, dispatch to a builder or the union
//! aggregator, execution and result normalization.

use super::all_channels::{self, UNION_ALIAS};
use super::document::{BuildOptions, BuildOutcome, BuiltQuery, FILTER_VALUE_ALIAS};
use super::{builder_for, ChannelConfig, ChannelSqlBuilder};
use crate::engine::QueryEngine;
use crate::error::{EngineError, EngineResult};
use crate::fanout;
use crate::integration::TenantSettings;
use crate::query::{
    Channel, ChannelQuery, ChannelQueryGroup, CHANNEL_OBJECT, FILTER_OBJECTS, UNION_CHANNELS,
};
use crate::result::{Cell, QueryResult, DATETIME_ALIAS};
use crate::sql::{SelectItem, SelectQuery, Source};
use crate::status::QueryStatus;
use crate::types::{is_identifier, ProjectId};
use crate::tz::{bucket_cell, parse_tz};
use chrono_tz::Tz;
use std::collections::HashSet;

/// Headers a query would produce, used when no SQL runs.
pub fn headers_for(query: &ChannelQuery) -> Vec<String> {
    let mut headers = Vec::new();
    if query.group_by_timestamp.is_some() {
        headers.push(DATETIME_ALIAS.to_string());
    }
    headers.extend(query.group_by.iter().map(|g| g.key_name()));
    headers.extend(query.metrics.iter().cloned());
    headers
}

impl<'a> QueryEngine<'a> {
    /// Run one channel query. Unknown channels and filter objects are
    /// rejected before any SQL is built; a channel the tenant has not
    /// integrated yields an empty, successful result.
    pub fn execute_channel_query(
        &self,
        project_id: ProjectId,
        query: &ChannelQuery,
        req_id: &str,
    ) -> (QueryResult, QueryStatus) {
        let outcome = query
            .channel
            .parse::<Channel>()
            .and_then(|channel| {
                query.validate()?;
                Ok(channel)
            })
            .and_then(|channel| {
                let tenant = self.load_tenant(project_id, req_id)?;
                self.route(channel, query, &tenant, req_id)
            });
        match outcome {
            Ok(done) => done,
            Err(e) => {
                let status = e.status();
                if status == QueryStatus::BadRequest {
                    log::warn!(
                        "req_id={req_id} project_id={project_id} channel={} rejected: {e}",
                        query.channel
                    );
                } else {
                    log::error!(
                        "req_id={req_id} project_id={project_id} channel={} failed: {e}",
                        query.channel
                    );
                }
                (QueryResult::error(&e.user_message()), status)
            }
        }
    }

    fn route(
        &self,
        channel: Channel,
        query: &ChannelQuery,
        tenant: &TenantSettings,
        req_id: &str,
    ) -> EngineResult<(QueryResult, QueryStatus)> {
        if query.metrics.is_empty() && query.group_by.is_empty() {
            log::debug!("req_id={req_id} channel={channel} nothing selected");
            return Ok((QueryResult::default(), QueryStatus::Ok));
        }
        match builder_for(channel) {
            Some(builder) => self.execute_single_channel(builder, query, tenant, req_id),
            None => self.execute_all_channels(query, tenant, req_id),
        }
    }

    fn execute_single_channel(
        &self,
        builder: &dyn ChannelSqlBuilder,
        query: &ChannelQuery,
        tenant: &TenantSettings,
        req_id: &str,
    ) -> EngineResult<(QueryResult, QueryStatus)> {
        if !all_channels::passes_channel_filters(builder.channel(), &query.filters) {
            log::debug!(
                "req_id={req_id} channel={} excluded by its channel filters",
                builder.channel()
            );
            return Ok((QueryResult::with_headers(headers_for(query)), QueryStatus::Ok));
        }

        let report_tz = parse_tz(&self.config.report_timezone)?;
        let mut opts = BuildOptions::single(self.config.row_limit, report_tz);

        // Bucketed breakdowns first find the top key combinations, then bucket
        // only those.
        if query.has_breakdown() && query.group_by_timestamp.is_some() {
            let mut discovery = query.clone();
            discovery.group_by_timestamp = None;
            let first_pass = BuildOptions::single(self.config.gbt_first_pass_limit, report_tz);
            let built = match builder.build(&discovery, tenant, &first_pass)? {
                BuildOutcome::Built(built) => built,
                BuildOutcome::NotIntegrated => return Ok(not_integrated(builder.channel(), query, req_id)),
            };
            let top = self.run_built(&built, req_id)?;
            if top.rows.is_empty() {
                return Ok((QueryResult::with_headers(headers_for(query)), QueryStatus::Ok));
            }
            opts.restrict_keys = distinct_prefixes(&top.rows, built.keys.len());
        }

        match builder.build(query, tenant, &opts)? {
            BuildOutcome::NotIntegrated => Ok(not_integrated(builder.channel(), query, req_id)),
            BuildOutcome::Built(built) => {
                let raw = self.run_built(&built, req_id)?;
                Ok((normalize(&built, raw, report_tz)?, QueryStatus::Ok))
            }
        }
    }

    pub(crate) fn run_built(&self, built: &BuiltQuery, req_id: &str) -> EngineResult<QueryResult> {
        let (sql, params) = built.render();
        self.run_sql(req_id, &sql, &params)
    }

    /// Run a list of channel queries under the channel concurrency ceiling.
    /// Failed members leave an error marker and degrade the status to
    /// partial content.
    pub fn run_channel_group(
        &self,
        project_id: ProjectId,
        group: &ChannelQueryGroup,
        req_id: &str,
    ) -> (Vec<QueryResult>, QueryStatus) {
        let report = fanout::run_bounded(
            "channel_group",
            &group.queries,
            self.config.channel_concurrency,
            |_, query| self.execute_channel_query(project_id, query, req_id),
        );
        let results = report.slots.into_iter().map(|(result, _)| result).collect();
        (results, report.status)
    }

    /// Selectable metrics and breakdowns for a channel, including the
    /// tenant's smart properties.
    pub fn channel_config(&self, project_id: ProjectId, channel: &str) -> EngineResult<ChannelConfig> {
        let channel: Channel = channel.parse()?;
        let (mut config, source) = match builder_for(channel) {
            Some(builder) => (builder.config(), channel.as_str()),
            None => (all_channels::all_channels_config(), "all"),
        };
        for object in ["campaign", "ad_group"] {
            let smart = self.catalog.smart_properties(project_id, object, source)?;
            config.merge_smart_properties(object, &smart);
        }
        Ok(config)
    }

    /// Distinct lower-cased values of a breakdown property, for filter pickers.
    pub fn channel_filter_values(
        &self,
        project_id: ProjectId,
        channel: &str,
        object: &str,
        property: &str,
        req_id: &str,
    ) -> EngineResult<Vec<String>> {
        let channel: Channel = channel.parse()?;
        if !FILTER_OBJECTS.contains(&object) {
            return Err(EngineError::UnknownFilterObject {
                channel: channel.as_str().to_string(),
                object: object.to_string(),
            });
        }
        if !is_identifier(property) {
            return Err(EngineError::InvalidQuery(format!(
                "invalid property name '{property}'"
            )));
        }
        let tenant = self.load_tenant(project_id, req_id)?;

        if object == CHANNEL_OBJECT {
            let candidates: &[Channel] = match channel {
                Channel::AllChannels => &UNION_CHANNELS,
                _ => std::slice::from_ref(&channel),
            };
            return Ok(candidates
                .iter()
                .filter(|c| tenant.is_integrated(**c))
                .map(|c| c.display_name().to_string())
                .collect());
        }

        let query = match builder_for(channel) {
            Some(builder) => match builder.build_filter_values(
                object,
                property,
                &tenant,
                false,
                Some(self.config.filter_values_limit),
            )? {
                BuildOutcome::Built(built) => built.fragment,
                BuildOutcome::NotIntegrated => return Ok(Vec::new()),
            },
            None => {
                let mut members = Vec::new();
                for c in UNION_CHANNELS {
                    let Some(builder) = builder_for(c) else { continue };
                    if let BuildOutcome::Built(built) =
                        builder.build_filter_values(object, property, &tenant, true, None)?
                    {
                        members.push(built.fragment);
                    }
                }
                if members.is_empty() {
                    return Ok(Vec::new());
                }
                let mut outer = SelectQuery::from_table(UNION_ALIAS);
                outer.distinct = true;
                outer.select.push(SelectItem::bare(FILTER_VALUE_ALIAS));
                outer.from = Source::Union {
                    members,
                    alias: UNION_ALIAS.to_string(),
                    distinct: true,
                };
                outer.limit = Some(self.config.union_filter_values_limit);
                outer
            }
        };

        let (sql, params) = query.render();
        let result = self.run_sql(req_id, &sql, &params)?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(Cell::Text(value)) => Some(value),
                _ => None,
            })
            .collect())
    }
}

fn not_integrated(channel: Channel, query: &ChannelQuery, req_id: &str) -> (QueryResult, QueryStatus) {
    log::debug!("req_id={req_id} channel={channel} not integrated; returning empty result");
    (QueryResult::with_headers(headers_for(query)), QueryStatus::Ok)
}

/// Unique leading `width` cells of each row, in first-seen order.
fn distinct_prefixes(rows: &[Vec<Cell>], width: usize) -> Vec<Vec<Cell>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let prefix: Vec<Cell> = row.iter().take(width).cloned().collect();
        let key: Vec<String> = prefix.iter().map(Cell::key_string).collect();
        if seen.insert(key) {
            out.push(prefix);
        }
    }
    out
}

/// Replace SQL column names with the builder's headers and turn bucket text
/// into timestamps.
pub(crate) fn normalize(built: &BuiltQuery, raw: QueryResult, report_tz: Tz) -> EngineResult<QueryResult> {
    let headers = built.headers();
    if !raw.rows.is_empty() && raw.headers.len() != headers.len() {
        return Err(EngineError::Other(anyhow::anyhow!(
            "channel={} returned {} columns, expected {}",
            built.channel,
            raw.headers.len(),
            headers.len()
        )));
    }
    let mut rows = raw.rows;
    if built.time_bucketed {
        for row in &mut rows {
            if let Some(first) = row.first_mut() {
                *first = bucket_cell(first, report_tz);
            }
        }
    }
    Ok(QueryResult::new(headers, rows))
}
