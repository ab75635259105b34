//! Record store boundary: partial updates and a change subscription over records
//! matching a status.
//!
//! - `changes`: change batches and the snapshot differ that produces them.
//! - `sqlite`: the SQLite-backed store used by the service and batch jobs.

pub mod changes;
pub mod sqlite;

pub use changes::{ChangeBatch, ChangeEvent, ChangeKind, SnapshotTracker};
pub use sqlite::SqliteRecordStore;

use crate::model::{RecordId, RecordPatch, RecordStatus, SurveyRecord};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("payload encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record {0} not found")]
    NotFound(RecordId),
    #[error("record {id} has invalid {field}: {value}")]
    Decode {
        id: String,
        field: &'static str,
        value: String,
    },
    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write only the fields present in `patch`.
    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> Result<(), StoreError>;

    /// Start observing records whose status equals `status`.
    async fn subscribe(&self, status: RecordStatus) -> Result<Subscription, StoreError>;

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<SurveyRecord>, StoreError>;
}

/// Cancellable stream of change batches. An `Err` item is fatal: nothing follows it.
pub struct Subscription {
    rx: mpsc::Receiver<Result<ChangeBatch, StoreError>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Result<ChangeBatch, StoreError>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Subscription fed by an external producer holding the sender half.
    pub fn from_receiver(rx: mpsc::Receiver<Result<ChangeBatch, StoreError>>) -> Self {
        Self { rx, task: None }
    }

    pub async fn next(&mut self) -> Option<Result<ChangeBatch, StoreError>> {
        self.rx.recv().await
    }

    /// Stop the producer. Only batches already buffered can still be read.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
