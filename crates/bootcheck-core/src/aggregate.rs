//! Collection of results from concurrently running attempts.
//!
//! Workers publish at most one [`WorkerResult`] each into a channel sized
//! to the number of catalog entries, so publishing never waits. After every
//! worker has finished, the collector drains the channel and overwrites the
//! matching ledger entries on a single thread.

use crate::ledger::{ArtifactResult, Ledger};
use tokio::sync::mpsc;

/// One artifact's new ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResult {
    /// Artifact identity.
    pub key: String,
    /// New result.
    pub value: ArtifactResult,
}

/// Receiving side of the results channel.
pub struct ResultCollector {
    sender: mpsc::Sender<WorkerResult>,
    receiver: mpsc::Receiver<WorkerResult>,
}

/// Sending side of the results channel, cloned into every worker.
#[derive(Clone)]
pub struct ResultSender {
    sender: mpsc::Sender<WorkerResult>,
}

impl ResultCollector {
    /// Creates a collector able to buffer `capacity` results.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self { sender, receiver }
    }

    /// Returns a sender for a worker.
    #[must_use]
    pub fn sender(&self) -> ResultSender {
        ResultSender {
            sender: self.sender.clone(),
        }
    }

    /// Drains every buffered result.
    ///
    /// Call only after all workers have returned; results published later
    /// are not observed.
    #[must_use]
    pub fn drain(self) -> Vec<WorkerResult> {
        let Self {
            sender,
            mut receiver,
        } = self;
        drop(sender);

        let mut results = Vec::new();
        while let Ok(result) = receiver.try_recv() {
            results.push(result);
        }
        results
    }

    /// Drains the channel into `ledger`, overwriting received keys.
    ///
    /// Returns the number of entries written.
    pub fn merge_into(self, ledger: &mut Ledger) -> usize {
        let results = self.drain();
        let merged = results.len();
        for result in results {
            ledger.insert(result.key, result.value);
        }
        merged
    }
}

impl ResultSender {
    /// Publishes a result.
    ///
    /// The channel is sized so this never waits; if it is somehow full or
    /// closed the result is logged and dropped, leaving the ledger entry
    /// unchanged.
    pub fn publish(&self, key: String, value: ArtifactResult) {
        if let Err(e) = self.sender.try_send(WorkerResult { key, value }) {
            let result = match e {
                mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
            };
            tracing::error!(artifact = %result.key, "Dropped verification result, results channel unavailable");
        }
    }
}
