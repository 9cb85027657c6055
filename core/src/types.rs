//! Shared primitive types used across the engine.

/// Tenant identifier. Every query is scoped to exactly one project.
pub type ProjectId = i64;

/// Correlates log lines for a single inbound request.
pub type ReqId = String;

/// Unix seconds.
pub type UnixTime = i64;

pub fn new_req_id() -> ReqId {
    uuid::Uuid::new_v4().to_string()
}

/// True for names safe to embed as SQL aliases or JSON path segments.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}
