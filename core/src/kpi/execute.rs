//! KPI group execution.

use super::formula::{evaluate_formula, operands};
use super::merge::{apply_operations, merge_results, relabel_zone, split_gbt};
use super::transform::{self, Combine};
use super::EventQuery;
use crate::engine::QueryEngine;
use crate::error::{EngineError, EngineResult};
use crate::fanout;
use crate::integration::TenantSettings;
use crate::query::{Channel, ChannelQuery, KpiCategory, KpiQuery, KpiQueryGroup};
use crate::result::QueryResult;
use crate::status::QueryStatus;
use crate::types::ProjectId;
use crate::tz::parse_tz;
use std::collections::HashMap;

/// Display categories served by channel queries.
static CHANNEL_CATEGORIES: &[(&str, Channel)] = &[
    ("google_ads_metrics", Channel::PaidSearch),
    ("facebook_metrics", Channel::SocialAds),
    ("linkedin_metrics", Channel::ProfessionalAds),
    ("search_console_metrics", Channel::OrganicSearch),
    ("all_channels_metrics", Channel::AllChannels),
];

pub fn channel_for_category(display_category: &str) -> Option<Channel> {
    CHANNEL_CATEGORIES
        .iter()
        .find(|(c, _)| *c == display_category)
        .map(|(_, channel)| *channel)
}

/// Zone used to bucket event and profile KPIs for this tenant.
fn effective_timezone<'t>(query: &'t KpiQuery, tenant: &'t TenantSettings) -> &'t str {
    if tenant.timezone_correction {
        &tenant.timezone
    } else {
        &query.timezone
    }
}

impl<'a> QueryEngine<'a> {
    /// Execute a KPI group. Members run one metric at a time under the KPI
    /// concurrency ceiling; failed members are left out of the merge and
    /// degrade the status to the worst one observed. Returns up to two
    /// results: non-bucketed, then bucketed.
    pub fn execute_kpi_group(
        &self,
        project_id: ProjectId,
        group: &KpiQueryGroup,
        req_id: &str,
    ) -> (Vec<QueryResult>, QueryStatus) {
        let tenant = match self.load_tenant(project_id, req_id) {
            Ok(t) => t,
            Err(e) => return (vec![QueryResult::error(&e.user_message())], e.status()),
        };

        let units: Vec<KpiQuery> = group
            .with_globals_applied()
            .iter()
            .flat_map(|q| q.metrics.iter().map(|m| q.for_metric(m)).collect::<Vec<_>>())
            .collect();
        log::debug!(
            "req_id={req_id} project_id={project_id} kpi units={}",
            units.len()
        );

        let report = fanout::run_bounded(
            "kpi_group",
            &units,
            self.config.kpi_concurrency,
            |_, unit| self.execute_kpi_query(project_id, unit, &tenant, req_id),
        );

        let mut status = QueryStatus::Ok;
        let mut first_error = None;
        let mut succeeded = Vec::new();
        for (unit, (result, unit_status)) in units.iter().zip(report.slots) {
            status = status.worst(unit_status);
            if result.is_error() {
                first_error.get_or_insert(result);
                continue;
            }
            succeeded.push((unit, result));
        }

        let (mut gbt, mut non_gbt) = split_gbt(succeeded);
        if tenant.timezone_correction {
            if let Ok(tz) = parse_tz(&tenant.timezone) {
                for result in &mut gbt {
                    relabel_zone(result, tz);
                }
            }
        }

        for derived in &group.derived {
            let outcome = derive_into(&derived.name, &derived.formula, &mut gbt)
                .or_else(|_| derive_into(&derived.name, &derived.formula, &mut non_gbt));
            if let Err(e) = outcome {
                log::warn!("req_id={req_id} derived kpi {} skipped: {e}", derived.name);
                status = status.worst(QueryStatus::PartialContent);
            }
        }

        let mut output = Vec::with_capacity(2);
        for part in [non_gbt, gbt] {
            match merge_results(&part) {
                Ok(merged) if merged.is_empty() => {}
                Ok(merged) => output.push(merged),
                Err(e) => {
                    log::error!("req_id={req_id} kpi merge failed: {e}");
                    status = status.worst(QueryStatus::InternalError);
                }
            }
        }
        if output.is_empty() {
            if let Some(error) = first_error {
                output.push(error);
            }
        }
        (output, status)
    }

    /// One KPI query restricted to a single metric.
    pub fn execute_kpi_query(
        &self,
        project_id: ProjectId,
        query: &KpiQuery,
        tenant: &TenantSettings,
        req_id: &str,
    ) -> (QueryResult, QueryStatus) {
        let Some(metric) = query.metrics.first() else {
            return (QueryResult::default(), QueryStatus::Ok);
        };
        let outcome = match query.category {
            KpiCategory::Channels => self.execute_channel_kpi(project_id, query, req_id),
            KpiCategory::Events => self
                .execute_event_kpi(project_id, query, metric, tenant, req_id)
                .map(|r| (r, QueryStatus::Ok)),
            KpiCategory::Profiles => self
                .execute_profile_kpi(project_id, query, tenant)
                .map(|r| (r, QueryStatus::Ok)),
        };
        match outcome {
            Ok((mut result, status)) => {
                if !result.is_error() {
                    if let Some(last) = result.headers.last_mut() {
                        *last = query.header_name(metric);
                    }
                }
                (result, status)
            }
            Err(e) => {
                log::error!(
                    "req_id={req_id} project_id={project_id} kpi {}/{metric} failed: {e}",
                    query.display_category
                );
                (QueryResult::error(&e.user_message()), e.status())
            }
        }
    }

    fn execute_channel_kpi(
        &self,
        project_id: ProjectId,
        query: &KpiQuery,
        req_id: &str,
    ) -> EngineResult<(QueryResult, QueryStatus)> {
        let channel = channel_for_category(&query.display_category).ok_or_else(|| {
            EngineError::InvalidQuery(format!(
                "'{}' is not a channel category",
                query.display_category
            ))
        })?;
        let channel_query = ChannelQuery {
            channel: channel.as_str().to_string(),
            filters: query.filters.iter().map(Into::into).collect(),
            group_by: query.group_by.iter().map(Into::into).collect(),
            metrics: query.metrics.clone(),
            from: query.from,
            to: query.to,
            timezone: query.timezone.clone(),
            group_by_timestamp: query.group_by_timestamp,
        };
        Ok(self.execute_channel_query(project_id, &channel_query, req_id))
    }

    fn execute_event_kpi(
        &self,
        project_id: ProjectId,
        query: &KpiQuery,
        metric: &str,
        tenant: &TenantSettings,
        req_id: &str,
    ) -> EngineResult<QueryResult> {
        let transformation = transform::lookup(&query.display_category, metric).ok_or_else(|| {
            EngineError::UnknownKpiMetric {
                display_category: query.display_category.clone(),
                metric: metric.to_string(),
            }
        })?;
        let timezone = effective_timezone(query, tenant);
        parse_tz(timezone)?;

        let steps: Vec<EventQuery> = transformation
            .steps
            .iter()
            .map(|step| {
                let mut filters: Vec<_> = step.filters.iter().map(|f| f.to_kpi_filter()).collect();
                filters.extend(query.filters.iter().cloned());
                EventQuery {
                    event_name: step.event_name.to_string(),
                    aggregate: step.aggregate.clone(),
                    filters,
                    group_by: query.group_by.clone(),
                    group_by_timestamp: query.group_by_timestamp,
                    from: query.from,
                    to: query.to,
                    timezone: timezone.to_string(),
                    metric_name: metric.to_string(),
                }
            })
            .collect();

        let report = fanout::run_bounded(
            "kpi_event_steps",
            &steps,
            self.config.kpi_concurrency,
            |_, step| match self.events.execute_event_query(project_id, step) {
                Ok(result) => (result, QueryStatus::Ok),
                Err(e) => {
                    log::error!(
                        "req_id={req_id} event step {} for {metric} failed: {e}",
                        step.event_name
                    );
                    (QueryResult::error(&e.user_message()), e.status())
                }
            },
        );
        if let Some((failed, status)) = report.slots.iter().find(|(r, s)| r.is_error() || s.is_failure()) {
            return Err(EngineError::Other(anyhow::anyhow!(
                "event sub-query failed with {status:?}: {:?}",
                failed.rows.first()
            )));
        }

        let ops: Vec<Combine> = transformation.steps.iter().map(|s| s.combine).collect();
        let results: Vec<QueryResult> = report.slots.into_iter().map(|(r, _)| r).collect();
        apply_operations(&results, &ops)
    }

    fn execute_profile_kpi(
        &self,
        project_id: ProjectId,
        query: &KpiQuery,
        tenant: &TenantSettings,
    ) -> EngineResult<QueryResult> {
        let mut corrected = query.clone();
        corrected.timezone = effective_timezone(query, tenant).to_string();
        parse_tz(&corrected.timezone)?;
        self.profiles.execute_profile_query(project_id, &corrected)
    }
}

/// Evaluate a derived KPI over `part` and append it there. Fails without
/// touching `part` when an operand is missing from it.
fn derive_into(name: &str, formula: &str, part: &mut Vec<QueryResult>) -> EngineResult<()> {
    let needed = operands(formula)?;
    let by_name: HashMap<String, &QueryResult> = part
        .iter()
        .filter_map(|r| r.headers.last().map(|h| (h.clone(), r)))
        .collect();
    if let Some(missing) = needed.iter().find(|n| !by_name.contains_key(*n)) {
        return Err(EngineError::InvalidQuery(format!(
            "operand '{missing}' is not available"
        )));
    }
    let derived = evaluate_formula(name, formula, &by_name)?;
    part.push(derived);
    Ok(())
}
