//! SELECT synthesis over first-party records (events and profiles).
//!
//! Results follow the KPI layout: the bucket first when bucketed, one column
//! per group-by, then the value column.

use crate::error::{EngineError, EngineResult};
use crate::query::{ChannelGroupBy, GroupByTimestamp, KpiFilter, KpiGroupBy};
use crate::result::{QueryResult, DATETIME_ALIAS};
use crate::sql::{fold_filters, FilterTerm, OrderItem, Predicate, SelectItem, SelectQuery, SortDirection};
use crate::tz::{bucket_cell, convert_sql, truncate_sql};
use crate::types::{is_identifier, ProjectId, UnixTime};
use chrono_tz::Tz;
use rusqlite::types::Value as SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RecordTable {
    Events,
    Profiles,
}

impl RecordTable {
    fn table(self) -> &'static str {
        match self {
            RecordTable::Events => "events",
            RecordTable::Profiles => "profiles",
        }
    }

    fn time_column(self) -> &'static str {
        match self {
            RecordTable::Events => "timestamp",
            RecordTable::Profiles => "joined_at",
        }
    }

    /// Expression reading `property` of `object` for the current row. Event
    /// rows reach user properties through the user's profile.
    fn property_expr(self, object: &str, property: &str) -> EngineResult<String> {
        if !is_identifier(property) {
            return Err(EngineError::InvalidQuery(format!(
                "invalid property name '{property}'"
            )));
        }
        match (self, object) {
            (RecordTable::Events, "event") | (RecordTable::Profiles, "user") => {
                Ok(format!("json_extract(properties, '$.{property}')"))
            }
            (RecordTable::Events, "user") => Ok(format!(
                "(SELECT json_extract(p.properties, '$.{property}') FROM profiles p \
                 WHERE p.project_id = events.project_id AND p.user_id = events.user_id)"
            )),
            _ => Err(EngineError::InvalidQuery(format!(
                "'{object}' properties are not available on {}",
                self.table()
            ))),
        }
    }
}

#[derive(Debug)]
pub(super) struct RecordSelect<'q> {
    pub table: RecordTable,
    pub project_id: ProjectId,
    pub filters: &'q [KpiFilter],
    pub group_by: &'q [KpiGroupBy],
    pub group_by_timestamp: Option<GroupByTimestamp>,
    pub from: UnixTime,
    pub to: UnixTime,
    pub tz: Tz,
    /// Aggregate SQL of the value column.
    pub aggregate: String,
    pub metric: &'q str,
    pub extra: Vec<Predicate>,
}

impl RecordSelect<'_> {
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::new();
        if self.group_by_timestamp.is_some() {
            headers.push(DATETIME_ALIAS.to_string());
        }
        headers.extend(self.group_by.iter().map(|g| ChannelGroupBy::from(g).key_name()));
        headers.push(self.metric.to_string());
        headers
    }

    pub fn build(&self) -> EngineResult<SelectQuery> {
        let mut query = SelectQuery::from_table(self.table.table());
        let time_column = self.table.time_column();

        if let Some(unit) = self.group_by_timestamp {
            let local = convert_sql(&format!("datetime({time_column}, 'unixepoch')"), self.tz);
            query
                .select
                .push(SelectItem::aliased(truncate_sql(unit, &local), DATETIME_ALIAS));
            query.group_by.push(DATETIME_ALIAS.to_string());
            query.order_by.push(OrderItem {
                expr: DATETIME_ALIAS.to_string(),
                direction: SortDirection::Asc,
            });
        }
        for g in self.group_by {
            let alias = ChannelGroupBy::from(g).key_name();
            if !is_identifier(&alias) {
                return Err(EngineError::InvalidQuery(format!("invalid group-by '{alias}'")));
            }
            query
                .select
                .push(SelectItem::aliased(self.table.property_expr(&g.object, &g.property)?, alias.clone()));
            query.group_by.push(alias);
        }
        query.select.push(SelectItem::aliased(self.aggregate.clone(), "value"));
        query.order_by.push(OrderItem {
            expr: "value".to_string(),
            direction: SortDirection::Desc,
        });

        query.predicates.push(Predicate::new(
            "project_id = ?",
            vec![SqlValue::Integer(self.project_id)],
        ));
        query.predicates.push(Predicate::new(
            format!("{time_column} BETWEEN ? AND ?"),
            vec![SqlValue::Integer(self.from), SqlValue::Integer(self.to)],
        ));
        query.predicates.extend(self.extra.iter().cloned());

        let terms = self
            .filters
            .iter()
            .map(|f| {
                Ok(FilterTerm {
                    expr: self.table.property_expr(&f.object, &f.property)?,
                    condition: f.condition,
                    value: f.value.as_str(),
                    logical_op: f.logical_op,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        if let Some(predicate) = fold_filters(&terms)? {
            query.predicates.push(predicate);
        }
        Ok(query)
    }

    /// Rename columns to the KPI headers and turn bucket text into timestamps.
    pub fn normalize(&self, raw: QueryResult) -> QueryResult {
        let mut rows = raw.rows;
        if self.group_by_timestamp.is_some() {
            for row in &mut rows {
                if let Some(first) = row.first_mut() {
                    *first = bucket_cell(first, self.tz);
                }
            }
        }
        QueryResult::new(self.headers(), rows)
    }
}

/// `json_extract` over the row's own properties, for numeric aggregates.
pub(super) fn numeric_property(property: &str) -> EngineResult<String> {
    if !is_identifier(property) {
        return Err(EngineError::InvalidQuery(format!(
            "invalid property name '{property}'"
        )));
    }
    Ok(format!("CAST(json_extract(properties, '$.{property}') AS REAL)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterCondition, LogicalOp};

    fn select<'q>(filters: &'q [KpiFilter], group_by: &'q [KpiGroupBy]) -> RecordSelect<'q> {
        RecordSelect {
            table: RecordTable::Events,
            project_id: 1,
            filters,
            group_by,
            group_by_timestamp: Some(GroupByTimestamp::Date),
            from: 0,
            to: 10,
            tz: chrono_tz::Asia::Kolkata,
            aggregate: "COUNT(*)".into(),
            metric: "page_views",
            extra: vec![Predicate::new("event_name = ?", vec![SqlValue::Text("$page_view".into())])],
        }
    }

    #[test]
    fn bucketed_select_converts_then_truncates() {
        let group_by = [KpiGroupBy {
            object: "user".into(),
            property: "country".into(),
        }];
        let s = select(&[], &group_by);
        let (sql, params) = s.build().unwrap().render();
        assert!(sql.starts_with(
            "SELECT date(convert_tz(datetime(timestamp, 'unixepoch'), 'UTC', 'Asia/Kolkata')) AS datetime"
        ));
        assert!(sql.contains("FROM profiles p WHERE p.project_id = events.project_id"));
        assert!(sql.contains("GROUP BY datetime, user_country"));
        assert_eq!(params.len(), 4);
        assert_eq!(s.headers(), vec!["datetime", "user_country", "page_views"]);
    }

    #[test]
    fn filters_bind_values_and_reject_bad_names() {
        let filters = [KpiFilter {
            object: "event".into(),
            property: "page_url".into(),
            condition: FilterCondition::Contains,
            value: "pricing".into(),
            logical_op: LogicalOp::And,
        }];
        let (sql, params) = select(&filters, &[]).build().unwrap().render();
        assert!(sql.contains("(json_extract(properties, '$.page_url') LIKE ?)"));
        assert_eq!(params.last(), Some(&SqlValue::Text("%pricing%".into())));

        let bad = [KpiFilter {
            property: "x') OR 1=1 --".into(),
            ..filters[0].clone()
        }];
        assert!(select(&bad, &[]).build().is_err());

        let wrong_object = [KpiFilter {
            object: "campaign".into(),
            ..filters[0].clone()
        }];
        assert!(select(&wrong_object, &[]).build().is_err());
    }
}
