use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::{JoinMerge, JoinSides, JoinType, MergeColumns};
use crate::operations::{Operation, OperationCore};
use crate::primitives::concurrency::{CancelToken, ReplayCache};
use crate::row::{CompoundKey, Row};
use crate::stream::{BoxRowStream, RowStream};
use crate::types::{PipelineError, Result};

/// Equi-join that hashes the right side by its key columns.
///
/// Right rows whose key columns are all null still match left rows whose key
/// columns are all null: keys compare structurally.
pub struct HashJoin {
    core: OperationCore,
    join_type: JoinType,
    left_columns: Vec<String>,
    right_columns: Vec<String>,
    sides: JoinSides,
}

/// Builder for [`HashJoin`]. Missing key columns or a missing right side are
/// reported by [`HashJoinBuilder::build`], before any row flows.
pub struct HashJoinBuilder {
    name: String,
    join_type: JoinType,
    left_columns: Option<Vec<String>>,
    right_columns: Option<Vec<String>>,
    left: Option<Arc<dyn Operation>>,
    right: Option<Arc<dyn Operation>>,
    merge: Box<dyn JoinMerge>,
}

impl HashJoin {
    /// Starts building a join of `join_type`.
    pub fn builder(name: impl Into<String>, join_type: JoinType) -> HashJoinBuilder {
        HashJoinBuilder {
            name: name.into(),
            join_type,
            left_columns: None,
            right_columns: None,
            left: None,
            right: None,
            merge: Box::new(MergeColumns),
        }
    }

    /// Configured join type.
    pub fn join_type(&self) -> JoinType {
        self.join_type
    }
}

impl HashJoinBuilder {
    /// Key columns read from left rows.
    pub fn left_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.left_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Key columns read from right rows.
    pub fn right_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.right_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Explicit left side. Without one the join probes the pipeline input.
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
    pub fn build(self) -> Result<Arc<HashJoin>> {
        let left_columns = self
            .left_columns
            .ok_or_else(|| PipelineError::config(&self.name, "left join columns are not set"))?;
        let right_columns = self
            .right_columns
            .ok_or_else(|| PipelineError::config(&self.name, "right join columns are not set"))?;
        if left_columns.len() != right_columns.len() {
            return Err(PipelineError::config(
                &self.name,
                format!(
                    "{} left join columns but {} right join columns",
                    left_columns.len(),
                    right_columns.len()
                ),
            ));
        }
        let right = self
            .right
            .ok_or_else(|| PipelineError::config(&self.name, "right side is not registered"))?;
        Ok(Arc::new(HashJoin {
            core: OperationCore::new(self.name),
            join_type: self.join_type,
            left_columns,
            right_columns,
            sides: JoinSides {
                left: self.left,
                right,
                merge: self.merge,
            },
        }))
    }
}

impl Operation for HashJoin {
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
        Ok(Box::new(HashJoinStream {
            op: self,
            cancel: cancel.clone(),
            phase: Phase::Build { input },
            pending: VecDeque::new(),
        }))
    }
}

struct BuiltRight {
    cache: ReplayCache,
    by_key: FxHashMap<CompoundKey, Vec<usize>>,
    matched: Vec<bool>,
}

enum Phase {
    Build { input: Option<BoxRowStream> },
    Probe { left: BoxRowStream, right: BuiltRight },
    Orphans { right: BuiltRight, next: usize },
    Done,
}

struct HashJoinStream {
    op: Arc<HashJoin>,
    cancel: CancelToken,
    phase: Phase,
    pending: VecDeque<Row>,
}

impl HashJoinStream {
    fn build(&self, input: Option<BoxRowStream>) -> Result<Phase> {
        let op = &self.op;
        let cache = op.sides.open_right(&self.cancel)?;
        let mut by_key: FxHashMap<CompoundKey, Vec<usize>> = FxHashMap::default();
        let mut rows = cache.stream();
        let mut index = 0;
        while let Some(row) = rows.try_next()? {
            by_key.entry(row.key(&op.right_columns)).or_default().push(index);
            index += 1;
        }
        debug!(
            operation = %op.core.name(),
            rows = index,
            keys = by_key.len(),
            "join.hash.built"
        );
        let left = op.sides.open_left(&op.core, input, &self.cancel)?;
        Ok(Phase::Probe {
            left,
            right: BuiltRight {
                cache,
                by_key,
                matched: vec![false; index],
            },
        })
    }

    fn probe(&mut self, left_row: Row, right: &mut BuiltRight) -> Result<()> {
        let sides = &self.op.sides;
        let key = left_row.key(&self.op.left_columns);
        match right.by_key.get(&key) {
            Some(indexes) => {
                for &index in indexes {
                    right.matched[index] = true;
                    if let Some(right_row) = right.cache.row_at(index)? {
                        self.pending.push_back(sides.merge.merge(&left_row, &right_row)?);
                    }
                }
            }
            None if self.op.join_type.keeps_left() => {
                self.pending.push_back(sides.merge.merge(&left_row, &Row::new())?);
            }
            None => sides.merge.left_orphan(&left_row),
        }
        Ok(())
    }

    fn scan_orphan(&mut self, right: &BuiltRight, index: usize) -> Result<bool> {
        let Some(right_row) = right.cache.row_at(index)? else {
            return Ok(false);
        };
        if !right.matched[index] {
            let sides = &self.op.sides;
            if self.op.join_type.keeps_right() {
                self.pending.push_back(sides.merge.merge(&Row::new(), &right_row)?);
            } else {
                sides.merge.right_orphan(&right_row);
            }
        }
        Ok(true)
    }

    fn advance(&mut self) -> Result<()> {
        let phase = std::mem::replace(&mut self.phase, Phase::Done);
        self.phase = match phase {
            Phase::Build { input } => self.build(input)?,
            Phase::Probe { mut left, mut right } => match left.try_next()? {
                Some(left_row) => {
                    self.probe(left_row, &mut right)?;
                    Phase::Probe { left, right }
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

impl RowStream for HashJoinStream {
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
