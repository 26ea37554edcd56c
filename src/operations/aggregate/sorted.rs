use std::sync::Arc;

use super::Aggregation;
use crate::operations::{require_input, Operation, OperationCore};
use crate::primitives::concurrency::CancelToken;
use crate::row::{CompoundKey, Row};
use crate::stream::{BoxRowStream, RowStream};
use crate::types::Result;

/// Streaming aggregation over input already ordered by the group key.
///
/// Holds one aggregate at a time and emits it when the key changes, so memory
/// does not depend on the number of groups. Sortedness is assumed, not
/// checked: a key that reappears later starts a new group. The last aggregate
/// is always emitted, even when the input was empty.
pub struct SortedAggregate {
    core: OperationCore,
    aggregation: Box<dyn Aggregation>,
}

impl SortedAggregate {
    /// Wraps `aggregation`.
    pub fn new(name: impl Into<String>, aggregation: impl Aggregation) -> Arc<Self> {
        Arc::new(Self {
            core: OperationCore::new(name),
            aggregation: Box::new(aggregation),
        })
    }
}

impl Operation for SortedAggregate {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        _cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        let input = require_input(&self.core, input)?;
        Ok(Box::new(SortedAggregateStream {
            op: self,
            input: Some(input),
            previous: None,
            current: Row::new(),
        }))
    }
}

struct SortedAggregateStream {
    op: Arc<SortedAggregate>,
    input: Option<BoxRowStream>,
    previous: Option<CompoundKey>,
    current: Row,
}

impl SortedAggregateStream {
    fn complete(&mut self) -> Result<Row> {
        let mut aggregate = std::mem::take(&mut self.current);
        self.op.aggregation.finish(&mut aggregate)?;
        Ok(aggregate)
    }
}

impl RowStream for SortedAggregateStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };
        let aggregation = &self.op.aggregation;
        while let Some(row) = input.try_next()? {
            let key = row.key(aggregation.group_by());
            let boundary = self.previous.as_ref().is_some_and(|prev| *prev != key);
            let emitted = if boundary {
                let mut aggregate = std::mem::take(&mut self.current);
                aggregation.finish(&mut aggregate)?;
                Some(aggregate)
            } else {
                None
            };
            aggregation.accumulate(&row, &mut self.current)?;
            self.previous = Some(key);
            if emitted.is_some() {
                return Ok(emitted);
            }
        }
        self.input = None;
        self.complete().map(Some)
    }
}
