//! Bounded fan-out: batching, slot isolation and panic recovery.

mod common;

use channel_kpi_core::{fanout::run_bounded, result::QueryResult, status::QueryStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn seven_tasks_under_ceiling_three_run_in_three_batches() {
    common::init_logging();
    let items: Vec<usize> = (0..7).collect();
    let running = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let report = run_bounded("test", &items, 3, |index, item| {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        running.fetch_sub(1, Ordering::SeqCst);
        if index == 3 {
            panic!("task four failed");
        }
        QueryResult::with_headers(vec![format!("slot_{item}")])
    });

    assert_eq!(report.batches, 3);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(report.status, QueryStatus::PartialContent);
    assert_eq!(report.slots.len(), 7);
    for (i, slot) in report.slots.iter().enumerate() {
        if i == 3 {
            assert!(slot.is_error());
        } else {
            assert_eq!(slot.headers, vec![format!("slot_{i}")]);
        }
    }
}

#[test]
fn all_successful_tasks_report_ok() {
    let items = vec!["a", "b", "c", "d"];
    let report = run_bounded("ok", &items, 2, |_, item| {
        (QueryResult::with_headers(vec![item.to_string()]), QueryStatus::Ok)
    });
    assert_eq!(report.batches, 2);
    assert_eq!(report.status, QueryStatus::Ok);
    let headers: Vec<&str> = report.slots.iter().map(|(r, _)| r.headers[0].as_str()).collect();
    assert_eq!(headers, vec!["a", "b", "c", "d"]);
}
