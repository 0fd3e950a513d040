//! Dispatch tests
//!
//! Run real shell commands through the control surface and check results,
//! progress, the concurrency cap and stop/resume behavior.

#![cfg(unix)]

use multicmd::batch::{Batch, ParameterRow, Progress, PruneReport, RowId, RowState};
use multicmd::config::BatchConfig;
use multicmd::template::TemplateError;
use multicmd::MultiCmdError;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

fn rows_from(values: &[&str]) -> Vec<ParameterRow> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| ParameterRow::new(index as RowId + 1, vec![value.to_string()]))
        .collect()
}

fn batch_with(values: &[&str], concurrency: usize) -> Batch {
    let batch = Batch::new(BatchConfig::default().with_concurrency(concurrency));
    batch
        .load(vec!["value".to_string()], rows_from(values))
        .expect("load should succeed");
    batch
}

async fn wait_done(batch: &Batch) {
    tokio::time::timeout(Duration::from_secs(30), batch.wait())
        .await
        .expect("dispatch should drain");
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition should become true");
}

fn results(batch: &Batch) -> Vec<Option<i32>> {
    batch.rows().iter().map(|row| row.result).collect()
}

fn run_counts(log: &Path) -> HashMap<String, usize> {
    let contents = std::fs::read_to_string(log).unwrap_or_default();
    let mut counts = HashMap::new();
    for line in contents.lines() {
        *counts.entry(line.trim().to_string()).or_insert(0) += 1;
    }
    counts
}

#[tokio::test]
async fn test_echo_end_to_end() {
    let batch = batch_with(&["a", "b", "c", "d", "e"], 2);

    let report = batch.start("echo {0}").expect("start should succeed");
    assert_eq!(report.submitted, 5);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.concurrency, 2);

    wait_done(&batch).await;

    assert_eq!(results(&batch), vec![Some(0); 5]);
    assert_eq!(batch.progress(), Progress { done: 5, total: 5 });
    assert!(!batch.is_active());
}

#[tokio::test]
async fn test_nonzero_status_is_recorded() {
    let batch = batch_with(&["0", "3", "42"], 3);
    batch.start("exit {0}").unwrap();
    wait_done(&batch).await;

    assert_eq!(results(&batch), vec![Some(0), Some(3), Some(42)]);
    assert_eq!(batch.progress().done, 3);
}

#[tokio::test]
async fn test_completed_rows_are_skipped() {
    let batch = batch_with(&["a", "b", "c", "d", "e"], 2);
    batch.store().set_result(2, 7);
    batch.store().set_result(4, 0);

    let report = batch.start("exit 3").unwrap();
    assert_eq!(report.submitted, 3);
    assert_eq!(report.skipped, 2);

    wait_done(&batch).await;
    assert_eq!(
        results(&batch),
        vec![Some(3), Some(7), Some(3), Some(0), Some(3)]
    );
    assert_eq!(batch.progress(), Progress { done: 5, total: 5 });
}

#[tokio::test]
async fn test_each_pending_row_runs_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs.log");
    let values: Vec<String> = (1..=12).map(|i| format!("row{i}")).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let batch = batch_with(&refs, 4);

    batch
        .start(&format!("echo {{0}} >> {}", log.display()))
        .unwrap();
    wait_done(&batch).await;

    let counts = run_counts(&log);
    assert_eq!(counts.len(), 12);
    assert!(counts.values().all(|&count| count == 1), "{counts:?}");
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    for concurrency in [1usize, 2, 5] {
        let values = vec!["0.2"; concurrency * 2 + 1];
        let batch = batch_with(&values, concurrency);

        batch.start("sleep {0}").unwrap();
        wait_done(&batch).await;

        assert!(
            batch.peak_running() <= concurrency,
            "peak {} exceeded cap {}",
            batch.peak_running(),
            concurrency
        );
        assert_eq!(batch.peak_running(), concurrency);
        assert_eq!(batch.running(), 0);
        assert_eq!(results(&batch), vec![Some(0); values.len()]);
    }
}

#[tokio::test]
async fn test_start_with_rejects_invalid_concurrency() {
    let batch = batch_with(&["a"], 1);
    assert!(matches!(
        batch.start_with("true", 0),
        Err(MultiCmdError::InvalidConcurrency(0))
    ));
    assert!(matches!(
        batch.start_with("true", 101),
        Err(MultiCmdError::InvalidConcurrency(101))
    ));
    assert!(!batch.is_active());
}

#[tokio::test]
async fn test_arity_mismatch_runs_nothing() {
    let batch = Batch::new(BatchConfig::default().with_concurrency(2));
    let rows = (1..=3)
        .map(|id| ParameterRow::new(id, vec!["x".to_string(), "y".to_string()]))
        .collect();
    batch.load(vec!["a".to_string(), "b".to_string()], rows).unwrap();

    let err = batch.start("{0}-{1}-{2}").unwrap_err();
    assert!(matches!(
        err,
        MultiCmdError::Template(TemplateError::ArityMismatch { row: 1, index: 2, arity: 2 })
    ));

    let report = batch.last_report().expect("report of the failed pass");
    assert_eq!(report.submitted, 0);
    assert_eq!(report.unscheduled, 3);

    wait_done(&batch).await;
    assert_eq!(results(&batch), vec![None, None, None]);
    assert_eq!(batch.progress().done, 0);
}

#[tokio::test]
async fn test_arity_mismatch_keeps_earlier_rows_running() {
    let batch = Batch::new(BatchConfig::default().with_concurrency(2));
    batch
        .load(
            Vec::new(),
            vec![
                ParameterRow::new(1, vec!["a".to_string(), "b".to_string()]),
                ParameterRow::new(2, vec!["c".to_string()]),
                ParameterRow::new(3, vec!["d".to_string(), "e".to_string()]),
            ],
        )
        .unwrap();

    let err = batch.start("echo {0} {1}").unwrap_err();
    assert!(matches!(
        err,
        MultiCmdError::Template(TemplateError::ArityMismatch { row: 2, .. })
    ));

    wait_done(&batch).await;
    assert_eq!(results(&batch), vec![Some(0), None, None]);
}

#[tokio::test]
async fn test_start_while_active_is_busy() {
    let batch = batch_with(&["5", "5"], 2);
    batch.start("sleep {0}").unwrap();

    assert!(matches!(batch.start("true"), Err(MultiCmdError::Busy)));
    assert!(matches!(batch.prune(), Err(MultiCmdError::Busy)));
    assert!(matches!(batch.clear_all_results(), Err(MultiCmdError::Busy)));
    assert!(matches!(
        batch.load(Vec::new(), Vec::new()),
        Err(MultiCmdError::Busy)
    ));

    assert!(batch.stop());
    wait_done(&batch).await;
    assert!(batch.start("true").is_ok());
    wait_done(&batch).await;
}

#[tokio::test]
async fn test_stopped_batch_accepts_commands_without_waiting() {
    let batch = batch_with(&["0", "30", "30"], 2);
    batch.start("sleep {0}").unwrap();
    wait_until(|| batch.store().completed_count() == 1).await;

    assert!(batch.stop());
    assert!(!batch.is_active());

    let report = batch.start("exit 4").expect("restart right after stop");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.submitted, 2);
    assert!(batch.stop());

    batch.clear_all_results().expect("reset right after stop");
    assert_eq!(results(&batch), vec![None; 3]);

    batch.store().set_result(1, 0);
    let report = batch.prune().expect("prune right after stop");
    assert_eq!(report, PruneReport { removed: 1, reset: 2 });
    assert_eq!(batch.progress(), Progress { done: 0, total: 2 });
}

#[tokio::test]
async fn test_scheduled_rows_track_in_flight_work() {
    let batch = batch_with(&["0", "30", "30"], 1);
    batch.start("sleep {0}").unwrap();
    assert_eq!(batch.scheduled_rows(), vec![1, 2, 3]);
    assert_eq!(batch.row_state(3), Some(RowState::Scheduled));

    wait_until(|| batch.row_state(1) == Some(RowState::Completed(0))).await;
    assert_eq!(batch.scheduled_rows(), vec![2, 3]);

    batch.stop();
    assert!(batch.scheduled_rows().is_empty());
    assert_eq!(batch.row_state(2), Some(RowState::Pending));
    assert_eq!(batch.row_state(3), Some(RowState::Pending));
}

#[tokio::test]
async fn test_stop_keeps_results_and_zeroes_progress() {
    let batch = batch_with(&["0", "0", "30", "30", "30"], 2);
    batch.start("sleep {0}").unwrap();

    wait_until(|| batch.store().completed_count() == 2).await;
    wait_until(|| batch.running() == 2).await;

    assert!(batch.stop());
    assert_eq!(batch.progress().done, 0);

    tokio::time::timeout(Duration::from_secs(5), batch.wait())
        .await
        .expect("stop should end the dispatch promptly");
    assert!(!batch.is_active());

    assert_eq!(results(&batch), vec![Some(0), Some(0), None, None, None]);
    assert_eq!(batch.progress().done, 0);
    wait_until(|| batch.running() == 0).await;
}

#[tokio::test]
async fn test_resume_runs_only_unfinished_rows() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs.log");
    let batch = batch_with(&["fast", "fast", "slow", "slow"], 2);

    // Fast rows finish, slow rows are killed by the stop.
    let first = format!(
        "echo {{0}} >> {}; [ {{0}} = fast ] || sleep 30",
        log.display()
    );
    batch.start(&first).unwrap();
    wait_until(|| batch.store().completed_count() == 2).await;
    wait_until(|| batch.running() == 2).await;
    batch.stop();
    wait_done(&batch).await;

    let resume_log = dir.path().join("resume.log");
    let report = batch
        .start(&format!("echo {{0}} >> {}", resume_log.display()))
        .unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.submitted, 2);
    wait_done(&batch).await;

    assert_eq!(results(&batch), vec![Some(0); 4]);
    assert_eq!(batch.progress(), Progress { done: 4, total: 4 });
    assert_eq!(run_counts(&resume_log).get("slow"), Some(&2));
    assert_eq!(run_counts(&resume_log).get("fast"), None);
}

#[tokio::test]
async fn test_reset_reruns_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs.log");
    let batch = batch_with(&["a", "b", "c"], 2);
    let template = format!("echo {{0}} >> {}", log.display());

    batch.start(&template).unwrap();
    wait_done(&batch).await;
    assert_eq!(results(&batch), vec![Some(0); 3]);

    batch.clear_all_results().unwrap();
    assert_eq!(results(&batch), vec![None; 3]);

    let report = batch.start(&template).unwrap();
    assert_eq!(report.submitted, 3);
    wait_done(&batch).await;

    let counts = run_counts(&log);
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&count| count == 2), "{counts:?}");
}

#[tokio::test]
async fn test_progress_subscription_reaches_total() {
    let batch = batch_with(&["a", "b", "c", "d"], 2);
    let mut rx = batch.subscribe_progress();

    batch.start("true").unwrap();
    tokio::time::timeout(
        Duration::from_secs(30),
        rx.wait_for(|progress| progress.is_complete()),
    )
    .await
    .expect("progress should complete")
    .expect("tracker alive");

    wait_done(&batch).await;
    assert_eq!(batch.progress(), Progress { done: 4, total: 4 });
}

#[tokio::test]
async fn test_load_file_and_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("rows.tsv");
    std::fs::write(&input, "code\tname\n0\tok\n5\tbad\n").unwrap();

    let batch = Batch::new(BatchConfig::default().with_concurrency(2));
    batch.load_file(&input).unwrap();
    assert_eq!(batch.headers(), vec!["code".to_string(), "name".to_string()]);

    batch.start("exit {0}").unwrap();
    wait_done(&batch).await;

    let rows = batch.rows();
    assert_eq!(rows.iter().map(|row| row.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(results(&batch), vec![Some(0), Some(5)]);
}
