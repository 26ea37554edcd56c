//! Group-by aggregation operations.
//!
//! Aggregate rows start out empty; [`Aggregation::accumulate`] is responsible
//! for copying group columns into them as well as folding values.

mod hash;
mod sorted;

pub use hash::HashAggregate;
pub use sorted::SortedAggregate;

use crate::row::Row;
use crate::types::Result;

/// Folding logic plugged into [`HashAggregate`] or [`SortedAggregate`].
pub trait Aggregation: Send + Sync + 'static {
    /// Columns forming the group key. Empty means a single global group.
    fn group_by(&self) -> &[String] {
        &[]
    }

    /// Folds `row` into `aggregate`.
    fn accumulate(&self, row: &Row, aggregate: &mut Row) -> Result<()>;

    /// Completes a group before it is emitted.
    fn finish(&self, _aggregate: &mut Row) -> Result<()> {
        Ok(())
    }
}

type AccumulateFn = dyn Fn(&Row, &mut Row) -> Result<()> + Send + Sync;
type FinishFn = dyn Fn(&mut Row) -> Result<()> + Send + Sync;

/// Closure-backed [`Aggregation`].
pub struct AggregateFn {
    group_by: Vec<String>,
    accumulate: Box<AccumulateFn>,
    finish: Option<Box<FinishFn>>,
}

impl AggregateFn {
    /// Groups by `group_by` and folds rows with `accumulate`.
    pub fn new<S, F>(group_by: impl IntoIterator<Item = S>, accumulate: F) -> Self
    where
        S: Into<String>,
        F: Fn(&Row, &mut Row) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            group_by: group_by.into_iter().map(Into::into).collect(),
            accumulate: Box::new(accumulate),
            finish: None,
        }
    }

    /// Runs `finish` on each group before it is emitted.
    pub fn with_finish<F>(mut self, finish: F) -> Self
    where
        F: Fn(&mut Row) -> Result<()> + Send + Sync + 'static,
    {
        self.finish = Some(Box::new(finish));
        self
    }
}

impl Aggregation for AggregateFn {
    fn group_by(&self) -> &[String] {
        &self.group_by
    }

    fn accumulate(&self, row: &Row, aggregate: &mut Row) -> Result<()> {
        (self.accumulate)(row, aggregate)
    }

    fn finish(&self, aggregate: &mut Row) -> Result<()> {
        match &self.finish {
            Some(finish) => finish(aggregate),
            None => Ok(()),
        }
    }
}
