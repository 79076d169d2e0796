//! Multicall batches and promises.
//!
//! Entities append call descriptors to the open batch and receive [`Promise`]
//! handles. Once the batch executes, each promise resolves against the
//! returned [`BatchResults`] at a well-defined phase boundary; nothing reads
//! a promise while the batch is in flight.

use serde_json::Value;

use hubward_core::{CallDescriptor, RemoteFault};

/// A handle to one call's eventual result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Promise {
    index: usize,
}

impl Promise {
    /// Resolve this promise against the results of its batch.
    pub fn settle<'a>(&self, results: &'a BatchResults) -> &'a Result<Value, RemoteFault> {
        &results.results[self.index]
    }
}

/// An open multicall batch: calls accumulate until the session executes it.
#[derive(Debug, Default)]
pub struct Batch {
    calls: Vec<CallDescriptor>,
}

impl Batch {
    pub fn new() -> Self {
        Batch { calls: Vec::new() }
    }

    /// Append a call, receiving a promise for its result.
    pub fn submit(&mut self, call: CallDescriptor) -> Promise {
        let index = self.calls.len();
        self.calls.push(call);
        Promise { index }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn calls(&self) -> &[CallDescriptor] {
        &self.calls
    }

    pub fn call(&self, promise: &Promise) -> &CallDescriptor {
        &self.calls[promise.index]
    }
}

/// Per-call results of an executed batch, in submission order.
#[derive(Debug)]
pub struct BatchResults {
    results: Vec<Result<Value, RemoteFault>>,
}

impl BatchResults {
    pub fn new(results: Vec<Result<Value, RemoteFault>>) -> Self {
        BatchResults { results }
    }

    /// A batch-wide failure: every call reports the same fault.
    pub fn all_failed(count: usize, fault: RemoteFault) -> Self {
        BatchResults {
            results: (0..count).map(|_| Err(fault.clone())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Clone out the settled results for a contiguous promise run.
    pub fn settle_all(&self, promises: &[Promise]) -> Vec<Result<Value, RemoteFault>> {
        promises
            .iter()
            .map(|promise| promise.settle(self).clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn promises_settle_in_submission_order() {
        let mut batch = Batch::new();
        let first = batch.submit(CallDescriptor::new("getTag").arg("a"));
        let second = batch.submit(CallDescriptor::new("getTag").arg("b"));
        assert_eq!(batch.len(), 2);

        let results = BatchResults::new(vec![Ok(json!("one")), Ok(json!("two"))]);
        assert_eq!(first.settle(&results).as_ref().unwrap(), &json!("one"));
        assert_eq!(second.settle(&results).as_ref().unwrap(), &json!("two"));
    }

    #[test]
    fn all_failed_clones_the_fault() {
        let results = BatchResults::all_failed(3, RemoteFault::new("deadline"));
        assert_eq!(results.len(), 3);
        let settled = results.settle_all(&[Promise { index: 0 }, Promise { index: 2 }]);
        assert!(settled.iter().all(|r| r.is_err()));
    }
}
