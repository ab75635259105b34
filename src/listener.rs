//! Bridges a pending-record subscription into the processing queue.
use crate::model::{QueueEntry, RecordStatus};
use crate::processor::SequentialProcessor;
use crate::store::{ChangeBatch, RecordStore, StoreError, Subscription};
use std::future::Future;
use tracing::{debug, error, info, warn};

/// Why [`ChangeListener::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    Shutdown,
    /// The stream reported a fatal error. No resubscription is attempted.
    StreamFailed,
    StreamClosed,
}

#[derive(Clone)]
pub struct ChangeListener {
    processor: SequentialProcessor,
}

impl ChangeListener {
    pub fn new(processor: SequentialProcessor) -> Self {
        Self { processor }
    }

    /// Subscribe to pending records on `store`.
    pub async fn subscribe(store: &dyn RecordStore) -> Result<Subscription, StoreError> {
        store.subscribe(RecordStatus::Pending).await
    }

    /// Queue every added record of the batch in delivery order, then trigger a drain.
    pub fn handle_batch(&self, batch: &ChangeBatch) -> usize {
        let mut queued = 0;
        for event in batch.added() {
            debug!(record = %event.id, "pending record observed");
            self.processor.enqueue(QueueEntry::from(event.record.clone()));
            queued += 1;
        }
        if queued > 0 {
            self.processor.trigger();
        }
        queued
    }

    /// Consume `subscription` until `shutdown` resolves or the stream ends.
    /// The subscription is cancelled on every exit path.
    pub async fn run<F>(&self, mut subscription: Subscription, shutdown: F) -> ListenerExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let exit = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; unsubscribing");
                    break ListenerExit::Shutdown;
                }
                item = subscription.next() => match item {
                    Some(Ok(batch)) => {
                        let queued = self.handle_batch(&batch);
                        if queued > 0 {
                            info!(queued, pending = self.processor.pending_len(), "records queued");
                        }
                    }
                    Some(Err(err)) => {
                        error!(error = %err, "change stream failed; listener stopped");
                        break ListenerExit::StreamFailed;
                    }
                    None => {
                        warn!("change stream closed");
                        break ListenerExit::StreamClosed;
                    }
                },
            }
        };
        subscription.unsubscribe();
        exit
    }
}
