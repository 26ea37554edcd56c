//! Process construction, hooks, reporting and configuration.

#![allow(missing_docs)]

mod common;

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rowflow::operations::basic::{CollectRows, RowTransform};
use rowflow::operations::command::{CommandTarget, CommandTransaction, OutputCommand};
use rowflow::operations::partial::PartialProcess;
use rowflow::pipeline::ConfigError;
use rowflow::{
    BoxRowStream, CancelToken, ExecuterKind, Operation, PipelineError, PipelineOptions,
    PipelineProcess, Result, Row, RowStream,
};

use common::{ids, init_tracing, int, options, EXECUTERS};

fn add_one(name: &str) -> Arc<RowTransform> {
    RowTransform::map(name, |row: Row| {
        let id = row.value("id").as_i64().unwrap_or(0);
        Ok(row.with("id", id + 1))
    })
}

#[test]
fn register_last_runs_after_the_main_chain() {
    init_tracing();
    let sink = CollectRows::new("sink");
    let process = PipelineProcess::new("ordering")
        .register_last(sink.clone())
        .register(ids("ids", 3))
        .register(add_one("plus_one"));
    let names: Vec<_> = process.operations().iter().map(|op| op.name().to_string()).collect();
    assert_eq!(names, ["ids", "plus_one", "sink"]);

    process.execute(&CancelToken::new());
    assert!(process.all_errors().is_empty());
    let seen: Vec<_> = sink.rows().iter().map(|r| int(r, "id")).collect();
    assert_eq!(seen, vec![1, 2, 3]);
}

struct CountHops(BoxRowStream);

impl RowStream for CountHops {
    fn try_next(&mut self) -> Result<Option<Row>> {
        Ok(self.0.try_next()?.map(|row| {
            let hops = row.value("hops").as_i64().unwrap_or(0);
            row.with("hops", hops + 1)
        }))
    }
}

#[test]
fn translate_rows_wraps_every_stage_output() {
    init_tracing();
    for executer in EXECUTERS {
        let sink = CollectRows::new("sink");
        let process = PipelineProcess::with_options("translated", options(executer))
            .register(ids("ids", 4))
            .register(add_one("plus_one"))
            .register(sink.clone())
            .translate_rows(|rows| Box::new(CountHops(rows)));
        process.execute(&CancelToken::new());

        assert!(process.all_errors().is_empty(), "{executer}");
        let hops: Vec<_> = sink.rows().iter().map(|r| int(r, "hops")).collect();
        assert_eq!(hops, vec![2, 2, 2, 2], "{executer}");
    }
}

#[test]
fn post_process_failure_is_reported() {
    init_tracing();
    let observed = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&observed);
    let process = PipelineProcess::new("post")
        .register(ids("ids", 7))
        .register(CollectRows::new("sink"))
        .post_process(move |process| {
            let written: u64 = process.operations().iter().map(|op| op.statistics().rows_written).sum();
            seen.store(written, Ordering::SeqCst);
            Err(PipelineError::execution("export step failed"))
        });
    process.execute(&CancelToken::new());

    assert_eq!(observed.load(Ordering::SeqCst), 14);
    let errors = process.all_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to_string(), "export step failed");
}

#[test]
fn all_errors_collects_nested_faults() {
    init_tracing();
    let failing = RowTransform::map("nested_failure", |_row: Row| {
        Err(PipelineError::execution("cannot process row"))
    });
    let chain = PartialProcess::new("chain")
        .register(add_one("plus_one"))
        .register(failing)
        .build();
    let process = PipelineProcess::with_options("nested", options(ExecuterKind::SingleThreaded))
        .register(ids("ids", 2))
        .register(chain);
    process.execute(&CancelToken::new());

    let errors = process.all_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("nested_failure"));
    assert!(matches!(errors[0].root(), PipelineError::Execution(_)));
}

#[test]
fn report_serializes_statistics_as_json() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let chain = PartialProcess::new("chain").register(add_one("plus_one")).build();
    let process = PipelineProcess::with_options("reported", options(ExecuterKind::SingleThreaded))
        .register(ids("ids", 5))
        .register(chain)
        .register(CollectRows::new("sink"));
    process.execute(&CancelToken::new());

    let report = process.report();
    assert_eq!(report.executer, "single-threaded");
    assert!(report.errors.is_empty());

    let json: serde_json::Value = serde_json::from_str(&report.to_json()?)?;
    assert_eq!(json["process"], "reported");
    let operations = json["operations"].as_array().cloned().unwrap_or_default();
    assert_eq!(operations.len(), 3);
    assert_eq!(operations[0]["name"], "ids");
    assert_eq!(operations[0]["rows_written"], 5);
    assert_eq!(operations[1]["state"], "disposed");
    assert_eq!(operations[1]["nested"][0]["name"], "plus_one");
    assert_eq!(operations[1]["nested"][0]["rows_read"], 5);
    assert_eq!(operations[2]["rows_read"], 5);
    Ok(())
}

#[test]
fn row_listeners_see_nested_operations() {
    init_tracing();
    let per_operation = Arc::new(Mutex::new(Vec::<String>::new()));
    let log = Arc::clone(&per_operation);
    let chain = PartialProcess::new("chain").register(add_one("plus_one")).build();
    let process = PipelineProcess::new("listened")
        .register(ids("ids", 2))
        .register(chain)
        .on_row_processed(Arc::new(move |op: &dyn Operation, _row: &Row| {
            log.lock().push(op.name().to_string());
        }));
    process.execute(&CancelToken::new());

    let mut names = per_operation.lock().clone();
    names.sort();
    assert_eq!(names, ["chain", "chain", "ids", "ids", "plus_one", "plus_one"]);
}

#[test]
fn options_load_from_toml_and_pick_the_executer() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "executer = \"single_threaded_cached\"")?;
    writeln!(file, "progress_interval = 2")?;
    writeln!(file, "wait_poll_ms = 5")?;
    let options = PipelineOptions::load(file.path())?;
    assert_eq!(options.executer, ExecuterKind::SingleThreadedCached);

    let sink = CollectRows::new("sink");
    let process = PipelineProcess::with_options("configured", options)
        .register(ids("ids", 6))
        .register(sink.clone());
    assert_eq!(process.executer().kind(), ExecuterKind::SingleThreadedCached);
    process.execute(&CancelToken::new());
    assert_eq!(sink.len(), 6);
    Ok(())
}

#[test]
fn malformed_options_name_the_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "executer = [")?;
    let err = PipelineOptions::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { path: Some(_), .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()));
    Ok(())
}

#[derive(Default)]
struct Journal {
    committed: Vec<Vec<i64>>,
    rolled_back: Vec<Vec<i64>>,
}

struct JournalTarget(Arc<Mutex<Journal>>);

struct JournalUnit {
    journal: Arc<Mutex<Journal>>,
    ids: Vec<i64>,
}

impl CommandTarget for JournalTarget {
    fn begin(&self) -> Result<Box<dyn CommandTransaction>> {
        Ok(Box::new(JournalUnit {
            journal: Arc::clone(&self.0),
            ids: Vec::new(),
        }))
    }
}

impl CommandTransaction for JournalUnit {
    fn execute(&mut self, row: &Row) -> Result<()> {
        self.ids.push(row.value("id").as_i64().unwrap_or(-1));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.journal.lock().committed.push(self.ids);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.journal.lock().rolled_back.push(self.ids);
        Ok(())
    }
}

#[test]
fn output_command_commits_a_clean_run() {
    init_tracing();
    let journal = Arc::new(Mutex::new(Journal::default()));
    let process = PipelineProcess::with_options("export", options(ExecuterKind::WorkerPool))
        .register(ids("ids", 5))
        .register(
            OutputCommand::new("write", JournalTarget(Arc::clone(&journal)))
                .with_batch_size(2)
                .build(),
        );
    process.execute(&CancelToken::new());

    assert!(process.all_errors().is_empty());
    let journal = journal.lock();
    assert_eq!(journal.committed, vec![vec![0, 1], vec![2, 3], vec![4]]);
    assert!(journal.rolled_back.is_empty());
}

#[test]
fn output_command_rolls_back_when_downstream_faults() {
    init_tracing();
    let journal = Arc::new(Mutex::new(Journal::default()));
    let reject_three = RowTransform::map("reject_three", |row: Row| {
        if row.value("id").as_i64() == Some(3) {
            return Err(PipelineError::execution("row 3 rejected"));
        }
        Ok(row)
    });
    let process = PipelineProcess::with_options("export", options(ExecuterKind::SingleThreaded))
        .register(ids("ids", 10))
        .register(
            OutputCommand::new("write", JournalTarget(Arc::clone(&journal)))
                .with_batch_size(10)
                .build(),
        )
        .register(reject_three);
    process.execute(&CancelToken::new());

    assert_eq!(process.all_errors().len(), 1);
    let journal = journal.lock();
    assert!(journal.committed.is_empty());
    assert_eq!(journal.rolled_back, vec![vec![0, 1, 2, 3]]);
}
