//! Event KPI transformations, keyed by (display category, metric).
//!
//! A transformation is a list of event sub-queries. The first step's values
//! seed the result; each later step folds in with its combine operator.

use super::EventAggregate;
use crate::query::{FilterCondition, KpiFilter, LogicalOp};
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    Passthrough,
    Division,
    Multiply,
    Addition,
    Subtract,
    Percentage,
}

impl Combine {
    /// Fold `value` into `acc`. Division by zero yields 0.
    pub fn apply(self, acc: f64, value: f64) -> f64 {
        match self {
            Combine::Passthrough => value,
            Combine::Division if value == 0.0 => 0.0,
            Combine::Division => acc / value,
            Combine::Multiply => acc * value,
            Combine::Addition => acc + value,
            Combine::Subtract => acc - value,
            Combine::Percentage if value == 0.0 => 0.0,
            Combine::Percentage => acc * 100.0 / value,
        }
    }
}

#[derive(Debug)]
pub struct StepFilter {
    pub property: &'static str,
    pub condition: FilterCondition,
    pub value: &'static str,
    pub logical_op: LogicalOp,
}

impl StepFilter {
    pub fn to_kpi_filter(&self) -> KpiFilter {
        KpiFilter {
            object: "event".to_string(),
            property: self.property.to_string(),
            condition: self.condition,
            value: self.value.to_string(),
            logical_op: self.logical_op,
        }
    }
}

#[derive(Debug)]
pub struct EventStep {
    pub event_name: &'static str,
    pub aggregate: EventAggregate,
    pub filters: &'static [StepFilter],
    pub combine: Combine,
}

#[derive(Debug)]
pub struct Transformation {
    pub display_category: &'static str,
    pub metric: &'static str,
    pub steps: &'static [EventStep],
}

const SESSION: &str = "$session";
const PAGE_VIEW: &str = "$page_view";
const FORM_SUBMITTED: &str = "$form_submitted";

const fn count(event_name: &'static str, combine: Combine) -> EventStep {
    EventStep {
        event_name,
        aggregate: EventAggregate::CountEvents,
        filters: &[],
        combine,
    }
}

const fn users(event_name: &'static str, combine: Combine) -> EventStep {
    EventStep {
        event_name,
        aggregate: EventAggregate::CountUsers,
        filters: &[],
        combine,
    }
}

const fn sum(event_name: &'static str, property: &'static str, combine: Combine) -> EventStep {
    EventStep {
        event_name,
        aggregate: EventAggregate::SumProperty(Cow::Borrowed(property)),
        filters: &[],
        combine,
    }
}

const ENGAGED: &[StepFilter] = &[
    StepFilter {
        property: "spent_time",
        condition: FilterCondition::GreaterThan,
        value: "10",
        logical_op: LogicalOp::And,
    },
    StepFilter {
        property: "page_count",
        condition: FilterCondition::GreaterThan,
        value: "2",
        logical_op: LogicalOp::Or,
    },
];

const BOUNCED: &[StepFilter] = &[StepFilter {
    property: "page_count",
    condition: FilterCondition::LessThan,
    value: "2",
    logical_op: LogicalOp::And,
}];

pub static TRANSFORMATIONS: &[Transformation] = &[
    // ── website_session ──
    Transformation {
        display_category: "website_session",
        metric: "total_sessions",
        steps: &[count(SESSION, Combine::Passthrough)],
    },
    Transformation {
        display_category: "website_session",
        metric: "unique_users",
        steps: &[users(SESSION, Combine::Passthrough)],
    },
    Transformation {
        display_category: "website_session",
        metric: "sessions_per_user",
        steps: &[
            count(SESSION, Combine::Passthrough),
            users(SESSION, Combine::Division),
        ],
    },
    Transformation {
        display_category: "website_session",
        metric: "engaged_sessions",
        steps: &[EventStep {
            event_name: SESSION,
            aggregate: EventAggregate::CountEvents,
            filters: ENGAGED,
            combine: Combine::Passthrough,
        }],
    },
    Transformation {
        display_category: "website_session",
        metric: "engagement_rate",
        steps: &[
            EventStep {
                event_name: SESSION,
                aggregate: EventAggregate::CountEvents,
                filters: ENGAGED,
                combine: Combine::Passthrough,
            },
            count(SESSION, Combine::Percentage),
        ],
    },
    Transformation {
        display_category: "website_session",
        metric: "bounce_rate",
        steps: &[
            EventStep {
                event_name: SESSION,
                aggregate: EventAggregate::CountEvents,
                filters: BOUNCED,
                combine: Combine::Passthrough,
            },
            count(SESSION, Combine::Percentage),
        ],
    },
    Transformation {
        display_category: "website_session",
        metric: "total_time_on_site",
        steps: &[sum(SESSION, "spent_time", Combine::Passthrough)],
    },
    Transformation {
        display_category: "website_session",
        metric: "avg_session_duration",
        steps: &[
            sum(SESSION, "spent_time", Combine::Passthrough),
            count(SESSION, Combine::Division),
        ],
    },
    Transformation {
        display_category: "website_session",
        metric: "avg_page_views_per_session",
        steps: &[
            sum(SESSION, "page_count", Combine::Passthrough),
            count(SESSION, Combine::Division),
        ],
    },
    // ── page_views ──
    Transformation {
        display_category: "page_views",
        metric: "page_views",
        steps: &[count(PAGE_VIEW, Combine::Passthrough)],
    },
    Transformation {
        display_category: "page_views",
        metric: "unique_users",
        steps: &[users(PAGE_VIEW, Combine::Passthrough)],
    },
    Transformation {
        display_category: "page_views",
        metric: "views_per_user",
        steps: &[
            count(PAGE_VIEW, Combine::Passthrough),
            users(PAGE_VIEW, Combine::Division),
        ],
    },
    // ── form_submission ──
    Transformation {
        display_category: "form_submission",
        metric: "count",
        steps: &[count(FORM_SUBMITTED, Combine::Passthrough)],
    },
    Transformation {
        display_category: "form_submission",
        metric: "unique_users",
        steps: &[users(FORM_SUBMITTED, Combine::Passthrough)],
    },
    Transformation {
        display_category: "form_submission",
        metric: "count_per_user",
        steps: &[
            count(FORM_SUBMITTED, Combine::Passthrough),
            users(FORM_SUBMITTED, Combine::Division),
        ],
    },
];

pub fn lookup(display_category: &str, metric: &str) -> Option<&'static Transformation> {
    TRANSFORMATIONS
        .iter()
        .find(|t| t.display_category == display_category && t.metric == metric)
}
