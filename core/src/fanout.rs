//! Bounded fan-out of independent sub-queries.
//!
//! Tasks run in synchronous batches of `P = min(N, ceiling)` scoped threads;
//! the next batch starts only after the whole previous batch has finished.
//! Each task writes one pre-allocated, index-addressed slot, so no result is
//! shared between tasks. A panicking task is caught at its own boundary,
//! logged, and leaves an error marker in its slot.

use crate::result::QueryResult;
use crate::status::QueryStatus;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// What a task leaves in its slot.
pub trait SlotOutcome: Send + Sized {
    fn from_panic(message: &str) -> Self;
    fn is_failure(&self) -> bool;
}

impl SlotOutcome for QueryResult {
    fn from_panic(message: &str) -> Self {
        QueryResult::error(message)
    }

    fn is_failure(&self) -> bool {
        self.is_error()
    }
}

impl SlotOutcome for (QueryResult, QueryStatus) {
    fn from_panic(message: &str) -> Self {
        (QueryResult::error(message), QueryStatus::InternalError)
    }

    fn is_failure(&self) -> bool {
        self.0.is_error() || self.1.is_failure()
    }
}

#[derive(Debug)]
pub struct FanoutReport<T> {
    /// One entry per input, in input order.
    pub slots: Vec<T>,
    pub batches: usize,
    /// `PartialContent` when any slot failed, `Ok` otherwise.
    pub status: QueryStatus,
}

pub fn run_bounded<I, T, F>(label: &str, items: &[I], ceiling: usize, task: F) -> FanoutReport<T>
where
    I: Sync,
    T: SlotOutcome,
    F: Fn(usize, &I) -> T + Sync,
{
    if items.is_empty() {
        return FanoutReport {
            slots: Vec::new(),
            batches: 0,
            status: QueryStatus::Ok,
        };
    }

    let parallelism = ceiling.max(1).min(items.len());
    let mut slots: Vec<Option<T>> = items.iter().map(|_| None).collect();
    let mut batches = 0;
    let task = &task;

    for (batch, (batch_items, batch_slots)) in items
        .chunks(parallelism)
        .zip(slots.chunks_mut(parallelism))
        .enumerate()
    {
        let offset = batch * parallelism;
        log::debug!(
            "fanout={label} batch={batch} tasks={} parallelism={parallelism}",
            batch_items.len()
        );
        let joined = crossbeam::thread::scope(|scope| {
            for (i, (item, slot)) in batch_items.iter().zip(batch_slots.iter_mut()).enumerate() {
                let index = offset + i;
                scope.spawn(move |_| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(index, item)));
                    *slot = Some(match outcome {
                        Ok(value) => value,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            log::error!("fanout={label} task={index} panicked: {message}");
                            T::from_panic(&message)
                        }
                    });
                });
            }
        });
        if joined.is_err() {
            log::error!("fanout={label} batch={batch} lost a task outside its recovery boundary");
        }
        batches += 1;
    }

    let slots: Vec<T> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                log::error!("fanout={label} task={index} left no result");
                T::from_panic("task did not complete")
            })
        })
        .collect();

    let failed = slots.iter().filter(|s| s.is_failure()).count();
    let status = if failed > 0 {
        log::warn!("fanout={label} {failed}/{} tasks failed", slots.len());
        QueryStatus::PartialContent
    } else {
        QueryStatus::Ok
    };

    FanoutReport {
        slots,
        batches,
        status,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_runs_nothing() {
        let items: Vec<u32> = Vec::new();
        let report = run_bounded("empty", &items, 4, |_, _| QueryResult::default());
        assert_eq!(report.batches, 0);
        assert_eq!(report.status, QueryStatus::Ok);
    }

    #[test]
    fn ceiling_larger_than_input_is_one_batch() {
        let items = vec![1, 2];
        let report = run_bounded("small", &items, 4, |_, _| QueryResult::default());
        assert_eq!(report.batches, 1);
        assert_eq!(report.slots.len(), 2);
    }

    #[test]
    fn tuple_slots_fail_on_status() {
        let items = vec![0, 1];
        let report = run_bounded("status", &items, 2, |_, i| {
            let status = if *i == 1 { QueryStatus::BadRequest } else { QueryStatus::Ok };
            (QueryResult::default(), status)
        });
        assert_eq!(report.status, QueryStatus::PartialContent);
    }
}
