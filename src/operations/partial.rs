use std::sync::Arc;

use super::{run, Operation, OperationCore};
use crate::primitives::concurrency::CancelToken;
use crate::stream::{empty, BoxRowStream};
use crate::types::Result;

/// A linear chain of operations packaged as a single operation.
///
/// Used for join sides and branch children. Each member's output feeds the
/// next member; the last member's output is the chain's output. Subscriptions,
/// error collection and disposal reach every member.
pub struct PartialProcess {
    core: OperationCore,
    members: Vec<Arc<dyn Operation>>,
}

impl PartialProcess {
    /// Starts an empty chain.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: OperationCore::new(name),
            members: Vec::new(),
        }
    }

    /// Appends `op` to the chain.
    pub fn register(mut self, op: Arc<dyn Operation>) -> Self {
        self.members.push(op);
        self
    }

    /// Finishes construction.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Number of registered members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Operation for PartialProcess {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn children(&self) -> Vec<Arc<dyn Operation>> {
        self.members.clone()
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        let mut stream = input;
        for member in &self.members {
            stream = Some(run(member, stream, cancel)?);
        }
        Ok(stream.unwrap_or_else(empty))
    }
}
