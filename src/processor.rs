//! Sequential processing queue.
//!
//! One record at a time goes through: validate, mark processing, render, email,
//! message, terminal status. Validation, the processing write and render are fatal
//! for the record; each send stage only records its own channel status.

use crate::dead_letter::DeadLetterLog;
use crate::model::{EmailStatus, MessagingStatus, QueueEntry, RecordId, RecordPatch, SurveyData};
use crate::notify::{EmailService, MessagingService, ReadinessPolicy};
use crate::render::{Artifact, RenderError, RenderService};
use crate::store::{RecordStore, StoreError};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Errors that send a record straight to `erro`. Display is the persisted message.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid survey payload: {0}")]
    InvalidPayload(String),
    #[error("missing required customer data: {0}")]
    Validation(String),
    #[error("failed to mark record as processing: {0}")]
    Store(#[source] StoreError),
    #[error("render failed: {0}")]
    Render(#[source] RenderError),
    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

/// Per-channel outcome of a record whose render succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub email: EmailStatus,
    pub messaging: MessagingStatus,
}

/// Collaborators the processor drives.
pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    renderer: Arc<dyn RenderService>,
    mailer: Arc<dyn EmailService>,
    messenger: Arc<dyn MessagingService>,
    readiness: ReadinessPolicy,
    clock: Clock,
    dead_letter: Option<DeadLetterLog>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        renderer: Arc<dyn RenderService>,
        mailer: Arc<dyn EmailService>,
        messenger: Arc<dyn MessagingService>,
    ) -> Self {
        Self {
            store,
            renderer,
            mailer,
            messenger,
            readiness: ReadinessPolicy::default(),
            clock: Arc::new(Utc::now),
            dead_letter: None,
        }
    }

    pub fn with_readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_dead_letter(mut self, log: DeadLetterLog) -> Self {
        self.dead_letter = Some(log);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

struct Inner {
    pipeline: Pipeline,
    pending: Mutex<VecDeque<QueueEntry>>,
    active: AtomicBool,
    wakeup: Notify,
}

/// FIFO of pending records plus the single-flight guard. Cheap to clone.
#[derive(Clone)]
pub struct SequentialProcessor {
    inner: Arc<Inner>,
}

/// Clears the active flag however the drain cycle ends.
struct ActiveGuard<'a>(&'a AtomicBool);

impl<'a> ActiveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SequentialProcessor {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                pending: Mutex::new(VecDeque::new()),
                active: AtomicBool::new(false),
                wakeup: Notify::new(),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<QueueEntry>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, entry: QueueEntry) {
        let mut pending = self.pending();
        pending.push_back(entry);
        debug!(pending = pending.len(), "record queued");
    }

    /// Wake the worker started by [`run`](Self::run). Never waits for the drain.
    pub fn trigger(&self) {
        self.inner.wakeup.notify_one();
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Process queued records until the list is empty. Returns how many this call
    /// processed; zero when another drain is active or nothing is queued.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            if self.pending_len() == 0 {
                return processed;
            }
            let Some(guard) = ActiveGuard::acquire(&self.inner.active) else {
                return processed;
            };
            loop {
                let next = self.pending().pop_front();
                let Some(entry) = next else { break };
                self.process_entry(entry).await;
                processed += 1;
            }
            drop(guard);
            // an enqueue may have landed between the last pop and the release
        }
    }

    /// Worker loop: drain on every trigger.
    pub async fn run(self) {
        loop {
            self.inner.wakeup.notified().await;
            if let Err(panic) = AssertUnwindSafe(self.drain()).catch_unwind().await {
                error!(panic = %panic_message(panic), "drain cycle panicked");
            }
        }
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    async fn process_entry(&self, entry: QueueEntry) {
        let pipeline = &self.inner.pipeline;
        let id = entry.id.clone();
        info!(record = %id, "processing record");

        let outcome = AssertUnwindSafe(self.run_stages(&entry))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessError::Panicked(panic_message(panic))));

        let patch = match &outcome {
            Ok(delivery) => {
                info!(
                    record = %id,
                    email = delivery.email.as_str(),
                    whats = delivery.messaging.as_str(),
                    "record processed"
                );
                RecordPatch::success(delivery.email, delivery.messaging, pipeline.now())
            }
            Err(err) => {
                error!(record = %id, error = %err, "record failed");
                RecordPatch::failure(err.to_string(), pipeline.now())
            }
        };

        if let Err(err) = pipeline.store.update(&id, &patch).await {
            error!(record = %id, error = %err, "terminal status write failed");
            self.dead_letter(&id, &patch, &err).await;
        }
    }

    async fn dead_letter(&self, id: &RecordId, patch: &RecordPatch, err: &StoreError) {
        let pipeline = &self.inner.pipeline;
        let Some(log) = &pipeline.dead_letter else {
            return;
        };
        match log.append(id, patch, &err.to_string(), pipeline.now()).await {
            Ok(()) => warn!(record = %id, path = %log.path().display(), "terminal status dead-lettered"),
            Err(io_err) => error!(record = %id, error = %io_err, "dead-letter append failed"),
        }
    }

    async fn run_stages(&self, entry: &QueueEntry) -> Result<Delivery, ProcessError> {
        let pipeline = &self.inner.pipeline;
        if let Some(err) = &entry.record.payload_error {
            return Err(ProcessError::InvalidPayload(err.clone()));
        }
        let survey = &entry.record.survey;
        validate(survey)?;

        pipeline
            .store
            .update(&entry.id, &RecordPatch::processing(pipeline.now()))
            .await
            .map_err(ProcessError::Store)?;

        let artifact = pipeline
            .renderer
            .render(survey)
            .await
            .map_err(ProcessError::Render)?;
        debug!(record = %entry.id, pdf = %artifact.path.display(), "render stage done");

        let email = self.email_stage(&entry.id, survey, &artifact).await;
        let messaging = self.messaging_stage(&entry.id, survey, &artifact).await;
        Ok(Delivery { email, messaging })
    }

    async fn email_stage(&self, id: &RecordId, survey: &SurveyData, artifact: &Artifact) -> EmailStatus {
        let Some(address) = survey.customer.email() else {
            debug!(record = %id, "no email address; skipping");
            return EmailStatus::NotApplicable;
        };
        match self
            .inner
            .pipeline
            .mailer
            .send(address, survey.customer.name.trim(), artifact)
            .await
        {
            Ok(()) => EmailStatus::Success,
            Err(err) => {
                warn!(record = %id, error = %err, "email stage failed");
                EmailStatus::Error
            }
        }
    }

    async fn messaging_stage(
        &self,
        id: &RecordId,
        survey: &SurveyData,
        artifact: &Artifact,
    ) -> MessagingStatus {
        let Some(phone) = survey.customer.phone() else {
            return MessagingStatus::NoRecipient;
        };
        let pipeline = &self.inner.pipeline;
        let name = survey.customer.name.trim();
        let sent = match pipeline
            .readiness
            .wait(pipeline.messenger.readiness(), name)
            .await
        {
            Ok(()) => pipeline.messenger.send(phone, name, artifact).await,
            Err(err) => Err(err),
        };
        match sent {
            Ok(()) => MessagingStatus::Success,
            Err(err) => {
                warn!(record = %id, error = %err, "messaging stage failed");
                MessagingStatus::Error
            }
        }
    }
}

/// Customer name and phone are required before any side effect.
pub fn validate(survey: &SurveyData) -> Result<(), ProcessError> {
    let mut missing = Vec::new();
    if survey.customer.name.trim().is_empty() {
        missing.push("cliente.nome");
    }
    if survey.customer.phone().is_none() {
        missing.push("cliente.fone");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProcessError::Validation(missing.join(", ")))
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Customer;

    #[test]
    fn validation_names_missing_fields() {
        let err = validate(&SurveyData::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required customer data: cliente.nome, cliente.fone"
        );

        let survey = SurveyData {
            customer: Customer {
                name: "Ana".into(),
                phone: "   ".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(validate(&survey), Err(ProcessError::Validation(m)) if m == "cliente.fone"));
    }

    #[test]
    fn render_error_message_carries_stage_context() {
        let err = ProcessError::Render(RenderError::Other("template missing".into()));
        assert_eq!(err.to_string(), "render failed: template missing");
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = ActiveGuard::acquire(&flag).unwrap();
        assert!(ActiveGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(ActiveGuard::acquire(&flag).is_some());
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
