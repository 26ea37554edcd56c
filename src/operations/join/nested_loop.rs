use std::collections::VecDeque;
use std::sync::Arc;

use super::{JoinMerge, JoinPair, JoinSides, MergeColumns};
use crate::operations::{Operation, OperationCore};
use crate::primitives::concurrency::{CancelToken, ReplayCache};
use crate::row::Row;
use crate::stream::{BoxRowStream, RowStream};
use crate::types::{PipelineError, Result};

type ConditionFn = dyn Fn(&JoinPair<'_>) -> Result<bool> + Send + Sync;

/// Join driven by an arbitrary predicate, rescanning the right side for every
/// left row.
///
/// Outer semantics come from the predicate: when a left row matched nothing
/// the predicate is asked about (left, sentinel), and unmatched right rows are
/// asked about (sentinel, right). The [`JoinPair`] helpers answer those the
/// way the matching join type expects.
pub struct NestedLoopJoin {
    core: OperationCore,
    condition: Box<ConditionFn>,
    sides: JoinSides,
}

/// Builder for [`NestedLoopJoin`].
pub struct NestedLoopJoinBuilder {
    name: String,
    condition: Option<Box<ConditionFn>>,
    left: Option<Arc<dyn Operation>>,
    right: Option<Arc<dyn Operation>>,
    merge: Box<dyn JoinMerge>,
}

impl NestedLoopJoin {
    /// Starts building a nested-loop join.
    pub fn builder(name: impl Into<String>) -> NestedLoopJoinBuilder {
        NestedLoopJoinBuilder {
            name: name.into(),
            condition: None,
            left: None,
            right: None,
            merge: Box::new(MergeColumns),
        }
    }
}

impl NestedLoopJoinBuilder {
    /// Match predicate; required.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&JoinPair<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Explicit left side. Without one the join reads the pipeline input.
    pub fn left(mut self, op: Arc<dyn Operation>) -> Self {
        self.left = Some(op);
        self
    }

    /// Right side; required.
    pub fn right(mut self, op: Arc<dyn Operation>) -> Self {
        self.right = Some(op);
        self
    }

    /// Replaces the default [`MergeColumns`] merge.
    pub fn merge(mut self, merge: impl JoinMerge) -> Self {
        self.merge = Box::new(merge);
        self
    }

    /// Validates the configuration.
    pub fn build(self) -> Result<Arc<NestedLoopJoin>> {
        let condition = self
            .condition
            .ok_or_else(|| PipelineError::config(&self.name, "join condition is not set"))?;
        let right = self
            .right
            .ok_or_else(|| PipelineError::config(&self.name, "right side is not registered"))?;
        Ok(Arc::new(NestedLoopJoin {
            core: OperationCore::new(self.name),
            condition,
            sides: JoinSides {
                left: self.left,
                right,
                merge: self.merge,
            },
        }))
    }
}

impl Operation for NestedLoopJoin {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn children(&self) -> Vec<Arc<dyn Operation>> {
        self.sides.children()
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        Ok(Box::new(NestedLoopStream {
            op: self,
            cancel: cancel.clone(),
            phase: Phase::Start { input },
            pending: VecDeque::new(),
        }))
    }
}

struct RightSide {
    cache: ReplayCache,
    matched: Vec<bool>,
}

enum Phase {
    Start { input: Option<BoxRowStream> },
    Scan { left: BoxRowStream, right: RightSide },
    Orphans { right: RightSide, next: usize },
    Done,
}

struct NestedLoopStream {
    op: Arc<NestedLoopJoin>,
    cancel: CancelToken,
    phase: Phase,
    pending: VecDeque<Row>,
}

impl NestedLoopStream {
    fn matches(&self, left: &Row, right: &Row) -> Result<bool> {
        (self.op.condition)(&JoinPair { left, right })
    }

    fn scan(&mut self, left_row: Row, right: &mut RightSide) -> Result<()> {
        let op = &self.op;
        let cancel = &self.cancel;
        let pending = &mut self.pending;
        let matched = &mut right.matched;
        let matched_any = right.cache.with_rows(|rows| {
            let mut matched_any = false;
            for (index, right_row) in rows.iter().enumerate() {
                cancel.check()?;
                if (op.condition)(&JoinPair { left: &left_row, right: right_row })? {
                    matched_any = true;
                    matched[index] = true;
                    pending.push_back(op.sides.merge.merge(&left_row, right_row)?);
                }
            }
            Ok(matched_any)
        })?;
        if !matched_any {
            if self.matches(&left_row, &Row::empty_marker())? {
                self.pending.push_back(self.op.sides.merge.merge(&left_row, &Row::new())?);
            } else {
                self.op.sides.merge.left_orphan(&left_row);
            }
        }
        Ok(())
    }

    fn scan_orphan(&mut self, right: &RightSide, index: usize) -> Result<bool> {
        let Some(right_row) = right.cache.row_at(index)? else {
            return Ok(false);
        };
        if right.matched[index] {
            return Ok(true);
        }
        let sides = &self.op.sides;
        if self.matches(&Row::empty_marker(), &right_row)? {
            self.pending.push_back(sides.merge.merge(&Row::new(), &right_row)?);
        } else {
            sides.merge.right_orphan(&right_row);
        }
        Ok(true)
    }

    fn advance(&mut self) -> Result<()> {
        let phase = std::mem::replace(&mut self.phase, Phase::Done);
        self.phase = match phase {
            Phase::Start { input } => {
                let op = &self.op;
                let cache = op.sides.open_right(&self.cancel)?;
                let rows = cache.fill()?;
                let left = op.sides.open_left(&op.core, input, &self.cancel)?;
                Phase::Scan {
                    left,
                    right: RightSide {
                        cache,
                        matched: vec![false; rows],
                    },
                }
            }
            Phase::Scan { mut left, mut right } => match left.try_next()? {
                Some(left_row) => {
                    self.scan(left_row, &mut right)?;
                    Phase::Scan { left, right }
                }
                None => Phase::Orphans { right, next: 0 },
            },
            Phase::Orphans { right, next } => {
                if self.scan_orphan(&right, next)? {
                    Phase::Orphans {
                        right,
                        next: next + 1,
                    }
                } else {
                    Phase::Done
                }
            }
            Phase::Done => Phase::Done,
        };
        Ok(())
    }
}

impl RowStream for NestedLoopStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if matches!(self.phase, Phase::Done) {
                return Ok(None);
            }
            self.advance()?;
        }
    }
}
