use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::Aggregation;
use crate::operations::{require_input, Operation, OperationCore};
use crate::primitives::concurrency::CancelToken;
use crate::row::{CompoundKey, Row};
use crate::stream::{BoxRowStream, RowStream};
use crate::types::Result;

/// Groups rows by key in memory and emits one aggregate per group after the
/// input is exhausted.
///
/// Memory grows with the number of distinct groups. Groups are emitted in the
/// order their first row arrived.
pub struct HashAggregate {
    core: OperationCore,
    aggregation: Box<dyn Aggregation>,
}

impl HashAggregate {
    /// Wraps `aggregation`.
    pub fn new(name: impl Into<String>, aggregation: impl Aggregation) -> Arc<Self> {
        Arc::new(Self {
            core: OperationCore::new(name),
            aggregation: Box::new(aggregation),
        })
    }
}

impl Operation for HashAggregate {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        _cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        let input = require_input(&self.core, input)?;
        Ok(Box::new(HashAggregateStream {
            op: self,
            input: Some(input),
            groups: Vec::new().into_iter(),
        }))
    }
}

struct HashAggregateStream {
    op: Arc<HashAggregate>,
    input: Option<BoxRowStream>,
    groups: std::vec::IntoIter<Row>,
}

impl HashAggregateStream {
    fn accumulate(&self, mut input: BoxRowStream) -> Result<Vec<Row>> {
        let aggregation = &self.op.aggregation;
        let group_by = aggregation.group_by();
        let mut index: FxHashMap<CompoundKey, usize> = FxHashMap::default();
        let mut groups: Vec<Row> = Vec::new();
        while let Some(row) = input.try_next()? {
            let slot = *index.entry(row.key(group_by)).or_insert_with(|| {
                groups.push(Row::new());
                groups.len() - 1
            });
            aggregation.accumulate(&row, &mut groups[slot])?;
        }
        debug!(
            operation = %self.op.core.name(),
            groups = groups.len(),
            "aggregate.hash.grouped"
        );
        Ok(groups)
    }
}

impl RowStream for HashAggregateStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        if let Some(input) = self.input.take() {
            self.groups = self.accumulate(input)?.into_iter();
        }
        match self.groups.next() {
            Some(mut aggregate) => {
                self.op.aggregation.finish(&mut aggregate)?;
                Ok(Some(aggregate))
            }
            None => Ok(None),
        }
    }
}
