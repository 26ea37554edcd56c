//! Join operations.
//!
//! Both algorithms read the right side once into a replay cache, stream the
//! left side (an explicit left operation or the pipeline's current stream),
//! and finish with a scan of right rows that never matched. Row merging and
//! orphan handling are pluggable through [`JoinMerge`].

mod hash;
mod nested_loop;

pub use hash::{HashJoin, HashJoinBuilder};
pub use nested_loop::{NestedLoopJoin, NestedLoopJoinBuilder};

use std::sync::Arc;

use tracing::trace;

use super::{run, Operation, OperationCore};
use crate::primitives::concurrency::{CancelToken, ReplayCache};
use crate::row::{Row, Value};
use crate::stream::BoxRowStream;
use crate::types::{PipelineError, Result};

/// Which unmatched rows a join keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// Only matched pairs.
    Inner,
    /// Matched pairs plus unmatched left rows.
    Left,
    /// Matched pairs plus unmatched right rows.
    Right,
    /// Matched pairs plus unmatched rows of both sides.
    Full,
}

impl JoinType {
    /// All four join types.
    pub const ALL: [JoinType; 4] = [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full];

    /// Left-outer bit.
    pub fn keeps_left(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    /// Right-outer bit.
    pub fn keeps_right(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

/// Combines matched rows and observes orphans.
///
/// The orphan hooks default to trace logging.
pub trait JoinMerge: Send + Sync + 'static {
    /// Builds the output row for a pair. One side is an empty row when an
    /// outer join emits an unmatched row.
    fn merge(&self, left: &Row, right: &Row) -> Result<Row>;

    /// Called for a left row that matched nothing and is not emitted.
    fn left_orphan(&self, row: &Row) {
        trace!(row = ?row, "join.orphan.left");
    }

    /// Called for a right row that matched nothing and is not emitted.
    fn right_orphan(&self, row: &Row) {
        trace!(row = ?row, "join.orphan.right");
    }
}

/// Default merge: the left row's columns followed by the right row's, right
/// side winning on duplicate names.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeColumns;

impl JoinMerge for MergeColumns {
    fn merge(&self, left: &Row, right: &Row) -> Result<Row> {
        Ok(left.merged_with(right))
    }
}

struct FnMerge<F>(F);

impl<F> JoinMerge for FnMerge<F>
where
    F: Fn(&Row, &Row) -> Result<Row> + Send + Sync + 'static,
{
    fn merge(&self, left: &Row, right: &Row) -> Result<Row> {
        (self.0)(left, right)
    }
}

/// Wraps a merge closure with the default orphan hooks.
pub fn merge_fn<F>(f: F) -> impl JoinMerge
where
    F: Fn(&Row, &Row) -> Result<Row> + Send + Sync + 'static,
{
    FnMerge(f)
}

/// The two rows a nested-loop predicate is asked about.
///
/// When the join probes for an outer match, the missing side is the
/// [`Row::empty_marker`] sentinel. The equality helpers below special-case
/// it so predicates written with them get outer-join semantics.
#[derive(Clone, Copy, Debug)]
pub struct JoinPair<'a> {
    /// Left row (or the empty sentinel).
    pub left: &'a Row,
    /// Right row (or the empty sentinel).
    pub right: &'a Row,
}

impl<'a> JoinPair<'a> {
    /// Values equal and non-null, and neither side is the sentinel.
    pub fn inner_join(&self, left: &Value, right: &Value) -> bool {
        if self.left.is_empty_marker() || self.right.is_empty_marker() {
            return false;
        }
        values_match(left, right)
    }

    /// Like [`JoinPair::inner_join`], but a sentinel on the right matches.
    pub fn left_join(&self, left: &Value, right: &Value) -> bool {
        if self.right.is_empty_marker() {
            return true;
        }
        values_match(left, right)
    }

    /// Like [`JoinPair::inner_join`], but a sentinel on the left matches.
    pub fn right_join(&self, left: &Value, right: &Value) -> bool {
        if self.left.is_empty_marker() {
            return true;
        }
        values_match(left, right)
    }

    /// Like [`JoinPair::inner_join`], but a sentinel on either side matches.
    pub fn full_join(&self, left: &Value, right: &Value) -> bool {
        if self.left.is_empty_marker() || self.right.is_empty_marker() {
            return true;
        }
        values_match(left, right)
    }

    /// Dispatches to the helper for `join_type`.
    pub fn matches(&self, join_type: JoinType, left: &Value, right: &Value) -> bool {
        match join_type {
            JoinType::Inner => self.inner_join(left, right),
            JoinType::Left => self.left_join(left, right),
            JoinType::Right => self.right_join(left, right),
            JoinType::Full => self.full_join(left, right),
        }
    }

    /// Compares `left_column` of the left row with `right_column` of the
    /// right row under `join_type`.
    pub fn on(&self, join_type: JoinType, left_column: &str, right_column: &str) -> bool {
        self.matches(
            join_type,
            self.left.value(left_column),
            self.right.value(right_column),
        )
    }
}

/// Nulls never match in predicate helpers.
fn values_match(left: &Value, right: &Value) -> bool {
    !left.is_null() && !right.is_null() && left.key_eq(right)
}

/// Nested operations and merge logic shared by both join algorithms.
pub(crate) struct JoinSides {
    pub(crate) left: Option<Arc<dyn Operation>>,
    pub(crate) right: Arc<dyn Operation>,
    pub(crate) merge: Box<dyn JoinMerge>,
}

impl JoinSides {
    pub(crate) fn children(&self) -> Vec<Arc<dyn Operation>> {
        let mut children = Vec::with_capacity(2);
        if let Some(left) = &self.left {
            children.push(Arc::clone(left));
        }
        children.push(Arc::clone(&self.right));
        children
    }

    /// Executes the right side behind a replay cache. Nothing is pulled yet.
    pub(crate) fn open_right(&self, cancel: &CancelToken) -> Result<ReplayCache> {
        Ok(ReplayCache::new(run(&self.right, None, cancel)?))
    }

    /// Executes the registered left side, or falls back to the pipeline input.
    pub(crate) fn open_left(
        &self,
        core: &OperationCore,
        input: Option<BoxRowStream>,
        cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        match &self.left {
            Some(left) => run(left, None, cancel),
            None => input.ok_or_else(|| PipelineError::MissingInput {
                operation: core.name().to_owned(),
            }),
        }
    }
}
