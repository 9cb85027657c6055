//! Merging KPI results.
//!
//! Every result handled here has breakdown columns followed by exactly one
//! value column. Rows are identified by their breakdown cells; a key missing
//! from one result reads as 0 there.

use super::transform::Combine;
use crate::error::{EngineError, EngineResult};
use crate::query::KpiQuery;
use crate::result::{Cell, QueryResult};
use crate::tz::resolve_local;
use chrono_tz::Tz;
use std::collections::HashMap;

/// Breakdown keys of a result in first-seen order, with their values.
#[derive(Debug, Default)]
pub struct ResultMap {
    pub keys: Vec<Vec<Cell>>,
    values: HashMap<String, f64>,
}

impl ResultMap {
    pub fn value(&self, key: &[Cell]) -> f64 {
        self.values.get(&key_id(key)).copied().unwrap_or(0.0)
    }

    fn insert(&mut self, key: Vec<Cell>, value: f64) {
        let id = key_id(&key);
        if !self.values.contains_key(&id) {
            self.keys.push(key);
        }
        *self.values.entry(id).or_insert(0.0) += value;
    }
}

fn key_id(key: &[Cell]) -> String {
    key.iter().map(Cell::key_string).collect::<Vec<_>>().join("\u{1f}")
}

/// Key every row on all cells but the last. `order` reorders key columns,
/// mapping output position to source position.
pub fn result_as_map(result: &QueryResult, order: Option<&[usize]>) -> ResultMap {
    let mut map = ResultMap::default();
    let width = result.headers.len().saturating_sub(1);
    for row in &result.rows {
        if row.len() < width + 1 {
            continue;
        }
        let key: Vec<Cell> = match order {
            Some(order) => order.iter().map(|&i| row[i].clone()).collect(),
            None => row[..width].to_vec(),
        };
        map.insert(key, row[width].as_f64());
    }
    map
}

/// Position in `other` of each key header of `first`, when the key header
/// sets match up to ordering.
pub(crate) fn key_order(first: &QueryResult, other: &QueryResult) -> EngineResult<Option<Vec<usize>>> {
    let first_keys = key_headers(first);
    let other_keys = key_headers(other);
    let matches = first_keys.len() == other_keys.len()
        && first_keys.iter().all(|h| other_keys.contains(h));
    if !matches {
        return Err(EngineError::InvalidQuery(format!(
            "cannot merge results with breakdowns {first_keys:?} and {other_keys:?}"
        )));
    }
    if first_keys == other_keys {
        return Ok(None);
    }
    Ok(Some(
        first_keys
            .iter()
            .filter_map(|h| other_keys.iter().position(|o| o == h))
            .collect(),
    ))
}

pub(crate) fn key_headers(result: &QueryResult) -> &[String] {
    let width = result.headers.len().saturating_sub(1);
    &result.headers[..width]
}

fn metric_header(result: &QueryResult) -> String {
    result.headers.last().cloned().unwrap_or_default()
}

/// Integral values stay integers so counts read naturally.
pub fn number_cell(value: f64) -> Cell {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Cell::Int(value as i64)
    } else {
        Cell::Float(value)
    }
}

fn sort_rows(rows: &mut [Vec<Cell>], key_width: usize) {
    rows.sort_by(|a, b| {
        a[..key_width]
            .iter()
            .zip(&b[..key_width])
            .map(|(x, y)| x.compare(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Union of keys across maps, in first-seen order.
fn all_keys(maps: &[ResultMap]) -> Vec<Vec<Cell>> {
    let mut seen = std::collections::HashSet::new();
    let mut keys = Vec::new();
    for map in maps {
        for key in &map.keys {
            if seen.insert(key_id(key)) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

fn maps_for(results: &[QueryResult]) -> EngineResult<Vec<ResultMap>> {
    let first = &results[0];
    results
        .iter()
        .map(|r| Ok(result_as_map(r, key_order(first, r)?.as_deref())))
        .collect()
}

/// Side-by-side merge: breakdown columns of the first result, then one value
/// column per input. Rows are sorted by their breakdown cells.
pub fn merge_results(results: &[QueryResult]) -> EngineResult<QueryResult> {
    if results.is_empty() {
        return Ok(QueryResult::default());
    }
    let maps = maps_for(results)?;
    let keys = all_keys(&maps);
    let key_width = key_headers(&results[0]).len();

    let mut headers: Vec<String> = key_headers(&results[0]).to_vec();
    headers.extend(results.iter().map(metric_header));

    let mut rows: Vec<Vec<Cell>> = keys
        .into_iter()
        .map(|key| {
            let values: Vec<Cell> = maps.iter().map(|m| number_cell(m.value(&key))).collect();
            let mut row = key;
            row.extend(values);
            row
        })
        .collect();
    sort_rows(&mut rows, key_width);
    Ok(QueryResult::new(headers, rows))
}

/// Fold step results into one value column: the first step seeds each key,
/// later steps apply their operator. Headers follow the first result.
pub fn apply_operations(results: &[QueryResult], ops: &[Combine]) -> EngineResult<QueryResult> {
    if results.is_empty() {
        return Ok(QueryResult::default());
    }
    if results.len() != ops.len() {
        return Err(EngineError::InvalidQuery(format!(
            "{} step results for {} operators",
            results.len(),
            ops.len()
        )));
    }
    let maps = maps_for(results)?;
    let keys = all_keys(&maps);
    let key_width = key_headers(&results[0]).len();

    let mut rows: Vec<Vec<Cell>> = keys
        .into_iter()
        .map(|key| {
            let value = maps
                .iter()
                .zip(ops)
                .fold(0.0, |acc, (map, op)| op.apply(acc, map.value(&key)));
            let mut row = key;
            row.push(number_cell(value));
            row
        })
        .collect();
    sort_rows(&mut rows, key_width);
    Ok(QueryResult::new(results[0].headers.clone(), rows))
}

/// Split results by whether their query buckets by time.
pub fn split_gbt<'q>(
    results: impl IntoIterator<Item = (&'q KpiQuery, QueryResult)>,
) -> (Vec<QueryResult>, Vec<QueryResult>) {
    let mut gbt = Vec::new();
    let mut non_gbt = Vec::new();
    for (query, result) in results {
        if query.group_by_timestamp.is_some() {
            gbt.push(result);
        } else {
            non_gbt.push(result);
        }
    }
    (gbt, non_gbt)
}

/// Re-read every bucket's wall-clock time in `tz`, so buckets produced in
/// different zones label the same calendar period identically.
pub fn relabel_zone(result: &mut QueryResult, tz: Tz) {
    if !result.is_time_bucketed() {
        return;
    }
    for row in &mut result.rows {
        let relabeled = match row.first() {
            Some(Cell::Timestamp(dt)) => {
                resolve_local(tz, &dt.naive_local()).map(|local| Cell::Timestamp(local.fixed_offset()))
            }
            _ => None,
        };
        if let Some(cell) = relabeled {
            row[0] = cell;
        }
    }
}
