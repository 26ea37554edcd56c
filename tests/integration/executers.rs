//! Behaviour shared by every executer: results, fault isolation,
//! cancellation, notifications and disposal.

#![allow(missing_docs)]

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rowflow::operations::aggregate::{AggregateFn, HashAggregate};
use rowflow::operations::basic::{CollectRows, RowTransform};
use rowflow::pipeline::PipelineExecuter;
use rowflow::{
    CancelToken, ExecuterKind, Operation, OperationState, PipelineError, PipelineProcess, Row,
};

use common::{ids, init_tracing, int, options, EXECUTERS};

fn fault_after_three() -> Arc<RowTransform> {
    RowTransform::map("fault_after_three", |row: Row| {
        if row.value("id").as_i64() == Some(3) {
            return Err(PipelineError::execution("fourth row is malformed"));
        }
        Ok(row)
    })
}

#[test]
fn stage_fault_is_recorded_once_and_downstream_ends_cleanly() {
    init_tracing();
    for executer in EXECUTERS {
        let source = ids("ids", 10);
        let faulty = fault_after_three();
        let sink = CollectRows::new("sink");
        let process = PipelineProcess::with_options("faulting", options(executer))
            .register(source.clone())
            .register(faulty.clone())
            .register(sink.clone());
        process.execute(&CancelToken::new());

        let errors = process.all_errors();
        assert_eq!(errors.len(), 1, "{executer}: {errors:?}");
        assert!(errors[0].to_string().contains("fault_after_three"));
        assert_eq!(faulty.core().errors().len(), 1);
        assert!(source.core().errors().is_empty());
        assert!(sink.core().errors().is_empty());

        let seen: Vec<_> = sink.rows().iter().map(|r| int(r, "id")).collect();
        assert_eq!(seen, vec![0, 1, 2], "{executer}");

        for op in process.operations() {
            assert_eq!(op.core().state(), OperationState::Disposed, "{}", op.name());
        }
        assert!(process.context().is_some_and(|c| c.has_errors()));
    }
}

fn poisoned_at_two() -> Arc<RowTransform> {
    RowTransform::map("poisoned_at_two", |row: Row| {
        if row.value("id").as_i64() == Some(2) {
            panic!("row two is poisoned");
        }
        Ok(row)
    })
}

#[test]
fn stage_panic_is_contained_and_every_operation_disposed() {
    init_tracing();
    for executer in EXECUTERS {
        let sink = CollectRows::new("sink");
        let process = PipelineProcess::with_options("panicking", options(executer))
            .register(ids("ids", 5))
            .register(poisoned_at_two())
            .register(sink.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| process.execute(&CancelToken::new())));
        assert!(outcome.is_ok(), "{executer}: panic escaped the run");

        let errors = process.all_errors();
        assert_eq!(errors.len(), 1, "{executer}: {errors:?}");
        assert!(errors[0].to_string().contains("row two is poisoned"), "{executer}");
        let seen: Vec<_> = sink.rows().iter().map(|r| int(r, "id")).collect();
        assert_eq!(seen, vec![0, 1], "{executer}");
        for op in process.operations() {
            assert_eq!(op.core().state(), OperationState::Disposed, "{executer}: {}", op.name());
        }
        assert!(process.context().is_some_and(|c| c.has_errors()));
    }
}

#[test]
fn every_executer_produces_the_same_rows() {
    init_tracing();
    let mut results = Vec::new();
    for executer in EXECUTERS {
        let sink = CollectRows::new("sink");
        let parity = AggregateFn::new(["parity"], |row, aggregate| {
            aggregate.set("parity", row.value("parity").clone());
            let sum = aggregate.value("sum").as_i64().unwrap_or(0);
            aggregate.set("sum", sum + row.value("id").as_i64().unwrap_or(0));
            Ok(())
        });
        let process = PipelineProcess::with_options("equivalence", options(executer))
            .register(ids("ids", 1000))
            .register(RowTransform::filter_map("skip_sevens", |row: Row| {
                Ok((row.value("id").as_i64().unwrap_or(0) % 7 != 0).then_some(row))
            }))
            .register(RowTransform::map("parity", |row: Row| {
                let parity = row.value("id").as_i64().unwrap_or(0) % 2;
                Ok(row.with("parity", parity))
            }))
            .register(HashAggregate::new("sum_by_parity", parity))
            .register(sink.clone());
        process.execute(&CancelToken::new());
        assert!(process.all_errors().is_empty(), "{executer}");
        results.push(sink.rows());
    }
    assert_eq!(results[0].len(), 2);
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}

#[test]
fn cancelled_before_start_records_only_cancellations() {
    init_tracing();
    for executer in EXECUTERS {
        let cancel = CancelToken::new();
        cancel.cancel();
        let sink = CollectRows::new("sink");
        let process = PipelineProcess::with_options("cancelled", options(executer))
            .register(ids("ids", 100))
            .register(sink.clone());
        process.execute(&cancel);

        let errors = process.all_errors();
        assert!(!errors.is_empty(), "{executer}");
        assert!(
            errors.iter().all(|e| matches!(e.root(), PipelineError::Cancelled)),
            "{executer}: {errors:?}"
        );
        assert!(sink.is_empty());
        for op in process.operations() {
            assert_eq!(op.core().state(), OperationState::Disposed);
        }
    }
}

#[test]
fn cancelling_mid_run_stops_a_single_threaded_pipeline() {
    init_tracing();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::with_options("cancel_mid_run", options(ExecuterKind::SingleThreaded))
        .register(ids("ids", 1000))
        .register(sink.clone())
        .on_row_processed(Arc::new(move |op: &dyn Operation, _row: &Row| {
            if op.name() == "sink" && op.core().statistics().rows_written() == 5 {
                trigger.cancel();
            }
        }));
    process.execute(&cancel);

    assert_eq!(sink.len(), 5);
    let errors = process.all_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].root(), PipelineError::Cancelled));
}

#[test]
fn cancelling_mid_run_stops_the_worker_pool() {
    init_tracing();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::with_options("cancel_mid_run", options(ExecuterKind::WorkerPool))
        .register(ids("ids", 100_000))
        .register(sink.clone())
        .on_row_processed(Arc::new(move |op: &dyn Operation, _row: &Row| {
            if op.name() == "sink" && op.core().statistics().rows_written() == 10 {
                trigger.cancel();
            }
        }));
    process.execute(&cancel);

    assert!(sink.len() >= 10);
    assert!(sink.len() < 100_000);
    assert!(!process.all_errors().is_empty());
}

#[test]
fn starting_and_completing_fire_around_the_run() {
    init_tracing();
    for executer in EXECUTERS {
        let events = Arc::new(Mutex::new(Vec::new()));
        let source = ids("ids", 3);
        let process = PipelineProcess::with_options("notified", options(executer)).register(source.clone());

        let log = Arc::clone(&events);
        process
            .executer()
            .on_execution_starting(Arc::new(move |exec: &dyn PipelineExecuter| {
                log.lock().push(format!("starting:{}", exec.kind()));
            }));
        let log = Arc::clone(&events);
        let watched = source.clone();
        process
            .executer()
            .on_execution_completing(Arc::new(move |_exec: &dyn PipelineExecuter| {
                let disposed = watched.core().state() == OperationState::Disposed;
                log.lock().push(format!("completing:disposed={disposed}"));
            }));
        process.execute(&CancelToken::new());

        assert_eq!(
            *events.lock(),
            vec![
                format!("starting:{executer}"),
                "completing:disposed=false".to_string(),
            ]
        );
        assert_eq!(source.core().state(), OperationState::Disposed);
    }
}

#[test]
fn finish_listeners_fire_once_per_operation() {
    init_tracing();
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    let process = PipelineProcess::with_options("finishing", options(ExecuterKind::WorkerPool))
        .register(ids("ids", 25))
        .register(RowTransform::map("identity", Ok))
        .register(CollectRows::new("sink"))
        .on_finished_processing(Arc::new(move |_op: &dyn Operation| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    process.execute(&CancelToken::new());
    assert_eq!(finished.load(Ordering::SeqCst), 3);
}

#[test]
fn rerunning_a_disposed_process_is_an_executer_fault() {
    init_tracing();
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::with_options("twice", options(ExecuterKind::SingleThreaded))
        .register(ids("ids", 3))
        .register(sink.clone());
    process.execute(&CancelToken::new());
    assert!(process.all_errors().is_empty());

    process.execute(&CancelToken::new());
    let errors = process.all_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], PipelineError::InvalidState { .. }));
    assert_eq!(sink.len(), 3);
}
