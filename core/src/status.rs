use serde::{Deserialize, Serialize};

/// Outcome of a query call. Variants are ordered by severity so the worst of
/// several statuses is their `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    NotFound,
    PartialContent,
    BadRequest,
    InternalError,
}

impl QueryStatus {
    pub fn http_code(self) -> u16 {
        match self {
            QueryStatus::Ok => 200,
            QueryStatus::NotFound => 404,
            QueryStatus::PartialContent => 206,
            QueryStatus::BadRequest => 400,
            QueryStatus::InternalError => 500,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, QueryStatus::BadRequest | QueryStatus::InternalError)
    }

    pub fn worst(self, other: QueryStatus) -> QueryStatus {
        self.max(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_picks_most_severe() {
        assert_eq!(QueryStatus::Ok.worst(QueryStatus::PartialContent), QueryStatus::PartialContent);
        assert_eq!(QueryStatus::InternalError.worst(QueryStatus::BadRequest), QueryStatus::InternalError);
        assert_eq!(QueryStatus::NotFound.worst(QueryStatus::Ok), QueryStatus::NotFound);
    }

    #[test]
    fn http_codes() {
        assert_eq!(QueryStatus::PartialContent.http_code(), 206);
        assert_eq!(QueryStatus::BadRequest.http_code(), 400);
        assert!(QueryStatus::InternalError.is_failure());
        assert!(!QueryStatus::NotFound.is_failure());
    }
}
