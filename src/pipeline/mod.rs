//! Drives an operation chain under a chosen concurrency strategy.
//!
//! [`PipelineProcess`] holds the chain, [`PipelineExecuter`] implementations
//! decide how stages are connected, and [`ExecutionContext`] carries run-wide
//! fault state.

mod context;
mod executer;
mod options;
mod process;
mod single_threaded;
mod worker_pool;

pub use context::ExecutionContext;
pub use executer::{ExecuterEvents, ExecuterListener, PipelineExecuter, StageWorkers, TranslateFn};
pub use options::{ConfigError, ExecuterKind, PipelineOptions, EXECUTER_ENV};
pub use process::{OperationReport, PipelineProcess, ProcessReport};
pub use single_threaded::SingleThreadedExecuter;
pub use worker_pool::WorkerPoolExecuter;
