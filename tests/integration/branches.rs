//! Fan-out through sequential and parallel branches.

#![allow(missing_docs)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rowflow::operations::basic::{CollectRows, RowSource, RowTransform};
use rowflow::operations::branch::Branch;
use rowflow::operations::partial::PartialProcess;
use rowflow::stream::from_rows;
use rowflow::{CancelToken, ExecuterKind, Operation, PipelineError, PipelineProcess, Row};

use common::{ids, init_tracing, int, options, EXECUTERS};

#[test]
fn parallel_children_get_independent_copies() {
    init_tracing();
    for executer in EXECUTERS {
        let mutated = CollectRows::new("mutated");
        let pristine = CollectRows::new("pristine");
        let mutate = PartialProcess::new("mutate_then_collect")
            .register(RowTransform::map("negate", |mut row: Row| {
                let id = row.value("id").as_i64().unwrap_or(0);
                row.set("id", -id);
                row.set("touched", true);
                Ok(row)
            }))
            .register(mutated.clone())
            .build();
        let branch = Branch::parallel("fan").add(mutate).add(pristine.clone()).build();
        let process = PipelineProcess::with_options("isolation", options(executer))
            .register(ids("ids", 50))
            .register(branch);
        process.execute(&CancelToken::new());
        assert!(process.all_errors().is_empty(), "{executer}");

        let pristine_ids: Vec<_> = pristine.rows().iter().map(|r| int(r, "id")).collect();
        assert_eq!(pristine_ids, (0..50).collect::<Vec<_>>());
        assert!(pristine.rows().iter().all(|r| !r.contains("touched")));
        let mutated_ids: Vec<_> = mutated.rows().iter().map(|r| int(r, "id")).collect();
        assert_eq!(mutated_ids, (0..50).map(|i| -i).collect::<Vec<_>>());
    }
}

#[test]
fn parallel_children_observe_the_same_order() {
    init_tracing();
    let collectors: Vec<_> = (0..6).map(|i| CollectRows::new(format!("child{i}"))).collect();
    let mut branch = Branch::parallel("fan");
    for collector in &collectors {
        branch = branch.add(collector.clone());
    }
    let process = PipelineProcess::with_options("order", options(ExecuterKind::WorkerPool))
        .register(ids("ids", 500))
        .register(branch.build());
    process.execute(&CancelToken::new());
    assert!(process.all_errors().is_empty());

    let expected = collectors[0].rows();
    assert_eq!(expected.len(), 500);
    for collector in &collectors[1..] {
        assert_eq!(collector.rows(), expected, "{}", collector.name());
    }
}

#[test]
fn sequential_child_fault_surfaces_in_the_process() {
    init_tracing();
    for executer in EXECUTERS {
        let failing = RowTransform::map("reject_odd", |row: Row| {
            if row.value("id").as_i64().unwrap_or(0) % 2 == 1 {
                return Err(PipelineError::execution("odd id"));
            }
            Ok(row)
        });
        let survivor = CollectRows::new("survivor");
        let branch = Branch::sequential("fan").add(failing).add(survivor.clone()).build();
        let process = PipelineProcess::with_options("faulting", options(executer))
            .register(ids("ids", 10))
            .register(branch);
        process.execute(&CancelToken::new());

        let errors = process.all_errors();
        assert_eq!(errors.len(), 1, "{executer}: {errors:?}");
        assert!(errors[0].to_string().contains("reject_odd"));
        assert!(matches!(errors[0].root(), PipelineError::Execution(_)));
        assert_eq!(survivor.len(), 10);
    }
}

#[test]
fn parallel_child_fault_does_not_stall_siblings() {
    init_tracing();
    let failing = RowTransform::map("fail_at_five", |row: Row| {
        if row.value("id").as_i64() == Some(5) {
            return Err(PipelineError::execution("bad row"));
        }
        Ok(row)
    });
    let survivor = CollectRows::new("survivor");
    let branch = Branch::parallel("fan").add(failing).add(survivor.clone()).build();
    let process = PipelineProcess::with_options("faulting", options(ExecuterKind::SingleThreaded))
        .register(ids("ids", 100))
        .register(branch);
    process.execute(&CancelToken::new());

    assert_eq!(survivor.len(), 100);
    let errors = process.all_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("fail_at_five"));
}

#[test]
fn sequential_branch_reads_its_input_once() {
    init_tracing();
    for executer in [ExecuterKind::SingleThreaded, ExecuterKind::SingleThreadedCached] {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let source = RowSource::from_fn("counted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(from_rows((0..20).map(|i| Row::new().with("id", i)).collect()))
        });
        let first = CollectRows::new("first");
        let second = CollectRows::new("second");
        let branch = Branch::sequential("fan").add(first.clone()).add(second.clone()).build();
        let process = PipelineProcess::with_options("cached", options(executer))
            .register(source.clone())
            .register(branch.clone());
        process.execute(&CancelToken::new());

        assert!(process.all_errors().is_empty(), "{executer}");
        assert_eq!(opened.load(Ordering::SeqCst), 1, "{executer}");
        assert_eq!(source.statistics().rows_written, 20, "{executer}");
        assert_eq!(branch.statistics().rows_read, 20, "{executer}");
        assert_eq!(first.rows(), second.rows());
        assert_eq!(first.len(), 20);
    }
}

#[test]
fn branch_children_are_disposed_with_the_branch() {
    init_tracing();
    let child = CollectRows::new("child");
    let nested = PartialProcess::new("nested").register(child.clone()).build();
    let branch = Branch::sequential("fan").add(nested.clone()).build();
    let process = PipelineProcess::new("dispose")
        .register(ids("ids", 3))
        .register(branch);
    process.execute(&CancelToken::new());

    assert_eq!(child.len(), 3);
    assert_eq!(nested.core().state(), rowflow::OperationState::Disposed);
    assert_eq!(child.core().state(), rowflow::OperationState::Disposed);
}

#[test]
fn panicking_child_is_reported_and_siblings_still_run() {
    init_tracing();
    for executer in EXECUTERS {
        for branch in [Branch::sequential("fan"), Branch::parallel("fan")] {
            let mode = branch.mode();
            let survivor = CollectRows::new("survivor");
            let bad_child: Arc<dyn Operation> = RowTransform::map("bad_child", |row: Row| {
                if row.value("id").as_i64() == Some(1) {
                    panic!("bad_child cannot handle id 1");
                }
                Ok(row)
            });
            let branch = branch.add(bad_child).add(survivor.clone()).build();
            let process = PipelineProcess::with_options("panicking_child", options(executer))
                .register(ids("ids", 5))
                .register(branch.clone());
            process.execute(&CancelToken::new());

            assert_eq!(survivor.len(), 5, "{executer} {mode:?}");
            let errors = process.all_errors();
            assert_eq!(errors.len(), 1, "{executer} {mode:?}: {errors:?}");
            let message = errors[0].to_string();
            assert!(message.contains("Failed to execute operation bad_child"), "{message}");
            assert!(message.contains("cannot handle id 1"), "{message}");
            assert!(branch.core().errors().is_empty());
        }
    }
}
