//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Once;

use rowflow::operations::basic::RowSource;
use rowflow::{ExecuterKind, PipelineOptions, Row, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const EXECUTERS: [ExecuterKind; 3] = [
    ExecuterKind::SingleThreaded,
    ExecuterKind::SingleThreadedCached,
    ExecuterKind::WorkerPool,
];

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rowflow=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

pub fn options(executer: ExecuterKind) -> PipelineOptions {
    PipelineOptions {
        executer,
        wait_poll_ms: 1,
        ..PipelineOptions::default()
    }
}

/// Source yielding rows with a single `id` column, `0..n`.
pub fn ids(name: &str, n: i64) -> Arc<RowSource> {
    RowSource::from_rows(name, (0..n).map(|i| Row::new().with("id", i)).collect())
}

pub fn text(row: &Row, column: &str) -> String {
    match row.value(column) {
        Value::String(s) => s.clone(),
        Value::Null => "<null>".to_string(),
        other => other.to_string(),
    }
}

pub fn int(row: &Row, column: &str) -> i64 {
    row.value(column).as_i64().unwrap_or(-1)
}
