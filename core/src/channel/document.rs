//! SQL synthesis over per-channel report documents.
//!
//! Every channel stores one row per (account, report type, day, entity) with
//! the entity's attributes and raw counters in a JSON `value` document. A
//! [`ChannelSchema`] describes where things live for one channel; the
//! functions here turn a [`ChannelQuery`] into a [`SelectQuery`] against it.

use crate::error::{EngineError, EngineResult};
use crate::integration::TenantSettings;
use crate::query::{
    Channel, ChannelFilter, ChannelGroupBy, ChannelQuery, GroupByTimestamp, CHANNEL_OBJECT,
};
use crate::result::{Cell, DATETIME_ALIAS};
use crate::sql::{
    fold_filters, FilterTerm, OrderItem, Predicate, SelectItem, SelectQuery, SortDirection,
};
use crate::tz::{convert_sql, parse_tz, truncate_sql, yyyymmdd};
use chrono_tz::Tz;
use rusqlite::types::Value as SqlValue;

/// Substituted for a zero divisor so ratio metrics never propagate NULL.
pub const ZERO_DIVISOR_SENTINEL: &str = "100000";

// ── Schema ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ObjectSpec {
    pub name: &'static str,
    /// Report type whose rows are at this object's grain.
    pub report: &'static str,
    /// Grain depth; the deepest object in a query picks the report type.
    pub level: u8,
    pub id_column: Option<&'static str>,
    /// Attribute keys in the value document are `<prefix>_<property>`.
    pub key_prefix: &'static str,
    pub properties: &'static [&'static str],
}

impl ObjectSpec {
    pub fn key_expr(&self, property: &str) -> String {
        match (property, self.id_column) {
            ("id", Some(column)) => column.to_string(),
            _ if self.key_prefix.is_empty() => doc_field(property),
            _ => doc_field(&format!("{}_{property}", self.key_prefix)),
        }
    }
}

#[derive(Debug)]
pub enum Aggregate {
    Sum(&'static str),
    SumScaled {
        field: &'static str,
        divisor: &'static str,
    },
    Avg(&'static str),
    /// `SUM(num) * scale / SUM(den)`, zero divisor replaced by the sentinel.
    Ratio {
        num: &'static str,
        den: &'static str,
        scale: &'static str,
    },
    /// Average of `value` weighted by `weight`.
    WeightedAvg {
        value: &'static str,
        weight: &'static str,
    },
}

impl Aggregate {
    pub fn render(&self) -> String {
        match self {
            Aggregate::Sum(f) => format!("SUM({})", doc_field(f)),
            Aggregate::SumScaled { field, divisor } => {
                format!("SUM({}) / {divisor}", doc_field(field))
            }
            Aggregate::Avg(f) => format!("AVG({})", doc_field(f)),
            Aggregate::Ratio { num, den, scale } => format!(
                "SUM({}) * {scale} / {}",
                doc_field(num),
                guarded_divisor(&format!("SUM({})", doc_field(den)))
            ),
            Aggregate::WeightedAvg { value, weight } => format!(
                "SUM({} * {}) * 1.0 / {}",
                doc_field(value),
                doc_field(weight),
                guarded_divisor(&format!("SUM({})", doc_field(weight)))
            ),
        }
    }
}

fn guarded_divisor(divisor: &str) -> String {
    format!("(CASE WHEN {divisor} = 0 THEN {ZERO_DIVISOR_SENTINEL} ELSE {divisor} END)")
}

#[derive(Debug)]
pub struct MetricSpec {
    pub name: &'static str,
    pub aggregate: Aggregate,
}

#[derive(Debug)]
pub struct ChannelSchema {
    pub channel: Channel,
    pub table: &'static str,
    pub account_column: &'static str,
    pub default_report: &'static str,
    pub objects: &'static [ObjectSpec],
    pub metrics: &'static [MetricSpec],
    /// Metrics where smaller is better, ordered ascending.
    pub ascending_metrics: &'static [&'static str],
    /// Union object name to this channel's object name.
    pub union_objects: &'static [(&'static str, &'static str)],
}

impl ChannelSchema {
    pub fn object(&self, name: &str) -> Option<&'static ObjectSpec> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn metric(&self, name: &str) -> Option<&'static MetricSpec> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Resolve a requested object. `None` means the `channel` pseudo object.
    fn resolve(&self, requested: &str, union_member: bool) -> EngineResult<Option<&'static ObjectSpec>> {
        if requested == CHANNEL_OBJECT {
            return Ok(None);
        }
        let name = if union_member {
            self.union_objects
                .iter()
                .find(|(common, _)| *common == requested)
                .map(|(_, own)| *own)
        } else {
            Some(requested)
        };
        name.and_then(|n| self.object(n))
            .map(Some)
            .ok_or_else(|| EngineError::UnknownFilterObject {
                channel: self.channel.as_str().to_string(),
                object: requested.to_string(),
            })
    }

    fn key_expr(&self, spec: Option<&ObjectSpec>, property: &str) -> String {
        match spec {
            Some(spec) => spec.key_expr(property),
            None => format!("'{}'", self.channel.display_name()),
        }
    }
}

pub fn doc_field(key: &str) -> String {
    format!("json_extract(value, '$.{key}')")
}

/// Report day column rendered as a `YYYY-MM-DD 00:00:00` datetime.
const REPORT_DAY_SQL: &str =
    "printf('%s-%s-%s 00:00:00', substr(timestamp, 1, 4), substr(timestamp, 5, 2), substr(timestamp, 7, 2))";

// ── Build output ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Building a member of the all-channels union: objects are the union's
    /// common names and no limit applies.
    pub union_member: bool,
    pub limit: Option<usize>,
    /// Zone report days are converted into before bucketing.
    pub report_tz: Tz,
    /// Restrict rows to these breakdown-key combinations.
    pub restrict_keys: Vec<Vec<Cell>>,
}

impl BuildOptions {
    pub fn single(limit: usize, report_tz: Tz) -> Self {
        Self {
            union_member: false,
            limit: Some(limit),
            report_tz,
            restrict_keys: Vec::new(),
        }
    }

    pub fn union_member(report_tz: Tz) -> Self {
        Self {
            union_member: true,
            limit: None,
            report_tz,
            restrict_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub channel: Channel,
    pub fragment: SelectQuery,
    /// Breakdown column names, `object_property`.
    pub keys: Vec<String>,
    pub metrics: Vec<String>,
    pub time_bucketed: bool,
}

impl BuiltQuery {
    /// Response headers: bucket first, then breakdown keys, then metrics.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::with_capacity(self.keys.len() + self.metrics.len() + 1);
        if self.time_bucketed {
            headers.push(DATETIME_ALIAS.to_string());
        }
        headers.extend(self.keys.iter().cloned());
        headers.extend(self.metrics.iter().cloned());
        headers
    }

    pub fn render(&self) -> (String, Vec<SqlValue>) {
        self.fragment.render()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Built(BuiltQuery),
    /// The tenant has no integration for this channel.
    NotIntegrated,
}

// ── Query synthesis ───────────────────────────────────────────────────

pub fn build_query(
    schema: &ChannelSchema,
    query: &ChannelQuery,
    tenant: &TenantSettings,
    opts: &BuildOptions,
) -> EngineResult<BuildOutcome> {
    let accounts = tenant.accounts_for(schema.channel);
    if accounts.is_empty() {
        return Ok(BuildOutcome::NotIntegrated);
    }

    let query_tz = parse_tz(&query.timezone)?;
    let from_day = yyyymmdd(query.from, query_tz)?;
    let to_day = yyyymmdd(query.to, query_tz)?;

    let group_by: Vec<(Option<&ObjectSpec>, &ChannelGroupBy)> = query
        .group_by
        .iter()
        .map(|g| Ok((schema.resolve(&g.object, opts.union_member)?, g)))
        .collect::<EngineResult<_>>()?;
    let filters: Vec<(&ObjectSpec, &ChannelFilter)> = query
        .filters
        .iter()
        .filter(|f| f.object != CHANNEL_OBJECT)
        .map(|f| {
            let spec = schema
                .resolve(&f.object, opts.union_member)?
                .ok_or_else(|| EngineError::InvalidQuery("channel filter on a document".into()))?;
            Ok((spec, f))
        })
        .collect::<EngineResult<_>>()?;

    let report = report_type(
        schema,
        group_by.iter().filter_map(|(s, _)| *s).chain(filters.iter().map(|(s, _)| *s)),
    );

    let mut fragment = SelectQuery::from_table(schema.table);
    let mut keys = Vec::new();
    let mut key_exprs = Vec::new();

    if let Some(unit) = query.group_by_timestamp {
        let bucket = bucket_expr(unit, opts.report_tz);
        fragment.select.push(SelectItem::aliased(bucket.clone(), DATETIME_ALIAS));
        fragment.group_by.push(bucket);
    }

    for (spec, g) in &group_by {
        let expr = schema.key_expr(*spec, &g.property);
        let name = g.key_name();
        fragment.select.push(SelectItem::aliased(expr.clone(), name.clone()));
        fragment.group_by.push(expr.clone());
        keys.push(name);
        key_exprs.push(expr);
    }

    let mut metrics = Vec::new();
    for name in &query.metrics {
        match schema.metric(name) {
            Some(spec) => {
                fragment.select.push(SelectItem::aliased(spec.aggregate.render(), name.clone()));
            }
            None => {
                log::warn!(
                    "channel={} metric={name} has no aggregate; projecting NULL",
                    schema.channel
                );
                fragment.select.push(SelectItem::aliased("NULL", name.clone()));
            }
        }
        metrics.push(name.clone());
    }

    fragment.predicates.push(Predicate::new(
        "project_id = ?",
        vec![SqlValue::Integer(tenant.project_id)],
    ));
    fragment
        .predicates
        .push(Predicate::in_list(schema.account_column, accounts));
    fragment
        .predicates
        .push(Predicate::new("type = ?", vec![SqlValue::Text(report.to_string())]));
    fragment.predicates.push(Predicate::new(
        "timestamp BETWEEN ? AND ?",
        vec![SqlValue::Integer(from_day), SqlValue::Integer(to_day)],
    ));

    let terms: Vec<FilterTerm<'_>> = filters
        .iter()
        .map(|(spec, f)| FilterTerm {
            expr: spec.key_expr(&f.property),
            condition: f.condition,
            value: &f.value,
            logical_op: f.logical_op,
        })
        .collect();
    if let Some(predicate) = fold_filters(&terms)? {
        fragment.predicates.push(predicate);
    }

    if !opts.restrict_keys.is_empty() {
        fragment
            .predicates
            .push(restrict_to_keys(&key_exprs, &opts.restrict_keys));
    }

    if query.group_by_timestamp.is_some() {
        fragment.order_by.push(OrderItem {
            expr: DATETIME_ALIAS.to_string(),
            direction: SortDirection::Asc,
        });
    }
    for name in &metrics {
        if schema.metric(name).is_none() {
            continue;
        }
        let direction = if schema.ascending_metrics.contains(&name.as_str()) {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        };
        fragment.order_by.push(OrderItem {
            expr: name.clone(),
            direction,
        });
    }
    fragment.limit = opts.limit;

    Ok(BuildOutcome::Built(BuiltQuery {
        channel: schema.channel,
        fragment,
        keys,
        metrics,
        time_bucketed: query.group_by_timestamp.is_some(),
    }))
}

/// Distinct lower-cased values of one breakdown property.
pub fn build_filter_values(
    schema: &ChannelSchema,
    object: &str,
    property: &str,
    tenant: &TenantSettings,
    union_member: bool,
    limit: Option<usize>,
) -> EngineResult<BuildOutcome> {
    let accounts = tenant.accounts_for(schema.channel);
    if accounts.is_empty() {
        return Ok(BuildOutcome::NotIntegrated);
    }
    let spec = schema
        .resolve(object, union_member)?
        .ok_or_else(|| EngineError::InvalidQuery("channel names are not stored in documents".into()))?;
    let expr = spec.key_expr(property);

    let mut fragment = SelectQuery::from_table(schema.table);
    fragment.distinct = true;
    fragment
        .select
        .push(SelectItem::aliased(format!("LOWER({expr})"), FILTER_VALUE_ALIAS));
    fragment.predicates.push(Predicate::new(
        "project_id = ?",
        vec![SqlValue::Integer(tenant.project_id)],
    ));
    fragment
        .predicates
        .push(Predicate::in_list(schema.account_column, accounts));
    fragment
        .predicates
        .push(Predicate::new("type = ?", vec![SqlValue::Text(spec.report.to_string())]));
    fragment
        .predicates
        .push(Predicate::new(format!("{expr} IS NOT NULL"), vec![]));
    fragment.limit = limit;

    Ok(BuildOutcome::Built(BuiltQuery {
        channel: schema.channel,
        fragment,
        keys: vec![FILTER_VALUE_ALIAS.to_string()],
        metrics: Vec::new(),
        time_bucketed: false,
    }))
}

pub const FILTER_VALUE_ALIAS: &str = "filter_value";

fn report_type<'a>(
    schema: &ChannelSchema,
    objects: impl Iterator<Item = &'a ObjectSpec>,
) -> &'static str {
    objects
        .max_by_key(|o| o.level)
        .map(|o| o.report)
        .unwrap_or(schema.default_report)
}

fn bucket_expr(unit: GroupByTimestamp, report_tz: Tz) -> String {
    truncate_sql(unit, &convert_sql(REPORT_DAY_SQL, report_tz))
}

fn restrict_to_keys(key_exprs: &[String], combinations: &[Vec<Cell>]) -> Predicate {
    let mut params = Vec::new();
    let mut alternatives = Vec::with_capacity(combinations.len());
    for combination in combinations {
        let terms: Vec<String> = key_exprs
            .iter()
            .zip(combination)
            .map(|(expr, cell)| match cell {
                Cell::Null => format!("{expr} IS NULL"),
                other => {
                    params.push(other.to_sql_value());
                    format!("{expr} = ?")
                }
            })
            .collect();
        alternatives.push(format!("({})", terms.join(" AND ")));
    }
    Predicate::new(format!("({})", alternatives.join(" OR ")), params)
}
