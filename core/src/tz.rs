//! Timezone helpers shared by SQL synthesis, the store's `convert_tz`
//! function and result normalization.

use crate::error::{EngineError, EngineResult};
use crate::query::GroupByTimestamp;
use crate::result::Cell;
use crate::types::UnixTime;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Textual datetime format used inside SQL expressions.
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse_tz(name: &str) -> EngineResult<Tz> {
    name.parse::<Tz>().map_err(|_| EngineError::InvalidTimezone {
        timezone: name.to_string(),
    })
}

/// Report-day integer (YYYYMMDD) of a unix timestamp in `tz`.
pub fn yyyymmdd(ts: UnixTime, tz: Tz) -> EngineResult<i64> {
    let utc = DateTime::<Utc>::from_timestamp(ts, 0)
        .ok_or_else(|| EngineError::InvalidQuery(format!("timestamp {ts} out of range")))?;
    let local = utc.with_timezone(&tz);
    let day: i64 = local.format("%Y%m%d").to_string().parse().map_err(|_| {
        EngineError::InvalidQuery(format!("cannot format timestamp {ts} as a report day"))
    })?;
    Ok(day)
}

/// Reinterpret a wall-clock datetime from one zone in another. Returns `None`
/// for text that is not a datetime or a date.
pub fn convert_tz_text(value: &str, from: &str, to: &str) -> Option<String> {
    let from: Tz = from.parse().ok()?;
    let to: Tz = to.parse().ok()?;
    let naive = parse_naive(value)?;
    let local = resolve_local(from, &naive)?;
    Some(local.with_timezone(&to).format(SQL_DATETIME_FORMAT).to_string())
}

fn parse_naive(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, SQL_DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Instant of a wall-clock reading in `tz`. Ambiguous readings take the
/// earlier instant; readings inside a DST gap move to the first instant after
/// the gap.
pub fn resolve_local(tz: Tz, naive: &NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(dt) = tz.from_local_datetime(naive).earliest() {
        return Some(dt);
    }
    // Gaps are at most a day long and start and end on quarter hours.
    (1..=96)
        .map(|step| *naive + Duration::minutes(15 * step))
        .find_map(|shifted| tz.from_local_datetime(&shifted).earliest())
}

/// Turn a bucket value produced by SQL into a timestamp cell in `tz`.
/// Cells that are not bucket text pass through unchanged.
pub fn bucket_cell(cell: &Cell, tz: Tz) -> Cell {
    let Cell::Text(text) = cell else {
        return cell.clone();
    };
    match parse_naive(text).and_then(|n| resolve_local(tz, &n)) {
        Some(dt) => Cell::Timestamp(dt.fixed_offset()),
        None => cell.clone(),
    }
}

/// SQL truncating the datetime expression `x` to the start of its bucket.
/// Weeks start on Sunday: shift forward a day, truncate to Monday, shift back.
pub fn truncate_sql(unit: GroupByTimestamp, x: &str) -> String {
    match unit {
        GroupByTimestamp::Hour => format!("strftime('%Y-%m-%d %H:00:00', {x})"),
        GroupByTimestamp::Date => format!("date({x})"),
        GroupByTimestamp::Week => {
            format!("date({x}, '+1 day', '-6 days', 'weekday 1', '-1 day')")
        }
        GroupByTimestamp::Month => format!("date({x}, 'start of month')"),
        GroupByTimestamp::Quarter => format!(
            "date({x}, 'start of month', printf('-%d months', (CAST(strftime('%m', {x}) AS INTEGER) - 1) % 3))"
        ),
    }
}

/// SQL converting `datetime_sql` from UTC into `tz`. The zone name is embedded
/// as a literal, so it must already have passed [`parse_tz`].
pub fn convert_sql(datetime_sql: &str, tz: Tz) -> String {
    format!("convert_tz({datetime_sql}, 'UTC', '{}')", tz.name())
}
