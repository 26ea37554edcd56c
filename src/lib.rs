//! Record-at-a-time pipeline engine.
//!
//! Operations transform, join, aggregate and fan out pull-based streams of
//! [`Row`]s. A [`pipeline::PipelineProcess`] wires a chain of operations
//! together and runs it under one of several executers: single-threaded,
//! single-threaded with replay caching, or one worker per stage.

#![warn(missing_docs)]

pub mod operations;
pub mod pipeline;
pub mod primitives;
pub mod row;
pub mod stream;
pub mod types;

pub use operations::{Operation, OperationCore, OperationState, StatisticsSnapshot};
pub use pipeline::{ExecuterKind, PipelineOptions, PipelineProcess};
pub use primitives::concurrency::CancelToken;
pub use row::{CompoundKey, Row, Value};
pub use stream::{BoxRowStream, RowStream};
pub use types::{PipelineError, Result};
