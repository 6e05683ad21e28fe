//! Minimal producer/consumer shutdown state
//!
//! The batching producer and the partition consumers live above this crate;
//! what lives here is exactly the state the client lifecycle needs to tear
//! them down in order: the consumer dead-flag and assignment set, and the
//! per-partition buffers of unacknowledged records that must be failed once
//! every broker is gone.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ClientError, Result};

/// Records buffered against a partition, awaiting a broker acknowledgement.
#[derive(Debug, Default)]
pub(crate) struct RecordBuffer {
    pending: Mutex<Vec<oneshot::Sender<Result<()>>>>,
}

impl RecordBuffer {
    /// Park a record; the returned receiver resolves when the record is
    /// acknowledged or failed.
    pub(crate) fn buffer(&self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().push(tx);
        rx
    }

    /// Fail every buffered record with `err`.
    pub(crate) fn fail_all(&self, err: &ClientError) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for tx in pending {
            let _ = tx.send(Err(err.clone()));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Consumer-side lifecycle state.
///
/// `dead` latches on the first close and makes both close and any late
/// assignment calls no-ops.
#[derive(Debug, Default)]
pub(crate) struct ConsumerState {
    pub(crate) dead: bool,
    pub(crate) assignment: HashMap<String, Vec<i32>>,
}

impl ConsumerState {
    /// Replace the assignment. An empty set drains all source consumers;
    /// repeated calls are harmless.
    pub(crate) fn assign(&mut self, assignment: HashMap<String, Vec<i32>>) {
        self.assignment = assignment;
    }
}
