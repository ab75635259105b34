#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use survey_dispatch::model::{
    Customer, QueueEntry, RecordId, RecordPatch, RecordStatus, SurveyData, SurveyRecord,
};
use survey_dispatch::notify::{EmailService, MessagingService, NotifyError, ReadinessGate};
use survey_dispatch::processor::{Clock, Pipeline, SequentialProcessor};
use survey_dispatch::render::{slugify, Artifact, RenderError, RenderService};
use survey_dispatch::store::{ChangeBatch, RecordStore, StoreError, Subscription};

/// Ordered log of every collaborator call across all fakes.
pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct StoreState {
    records: HashMap<RecordId, SurveyRecord>,
    processing: HashSet<RecordId>,
    max_processing: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    journal: Journal,
    state: Arc<Mutex<StoreState>>,
    updates: Arc<Mutex<Vec<(RecordId, RecordPatch)>>>,
    responses: Arc<Mutex<VecDeque<Result<(), String>>>>,
    feed: Arc<Mutex<Option<mpsc::Receiver<Result<ChangeBatch, StoreError>>>>>,
}

impl MemoryStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Script update outcomes in call order; unscripted calls succeed.
    pub async fn script(&self, responses: Vec<Result<(), String>>) {
        self.responses.lock().await.extend(responses);
    }

    pub async fn seed(&self, record: SurveyRecord) {
        self.state
            .lock()
            .await
            .records
            .insert(record.id.clone(), record);
    }

    pub async fn updates(&self) -> Vec<(RecordId, RecordPatch)> {
        self.updates.lock().await.clone()
    }

    pub async fn terminal_updates(&self) -> Vec<(RecordId, RecordPatch)> {
        self.updates()
            .await
            .into_iter()
            .filter(|(_, p)| p.status.map(|s| s.is_terminal()).unwrap_or(false))
            .collect()
    }

    pub async fn max_processing(&self) -> usize {
        self.state.lock().await.max_processing
    }

    /// Sender feeding the next `subscribe` call.
    pub async fn feed(&self) -> mpsc::Sender<Result<ChangeBatch, StoreError>> {
        let (tx, rx) = mpsc::channel(16);
        *self.feed.lock().await = Some(rx);
        tx
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> Result<(), StoreError> {
        let status = patch.status.map(|s| s.as_str()).unwrap_or("-");
        self.journal
            .lock()
            .await
            .push(format!("update:{status}:{id}"));
        self.updates.lock().await.push((id.clone(), patch.clone()));
        tokio::task::yield_now().await;

        if let Some(Err(message)) = self.responses.lock().await.pop_front() {
            return Err(StoreError::Backend(message));
        }

        let mut state = self.state.lock().await;
        match patch.status {
            Some(RecordStatus::Processing) => {
                state.processing.insert(id.clone());
                state.max_processing = state.max_processing.max(state.processing.len());
            }
            Some(_) => {
                state.processing.remove(id);
            }
            None => {}
        }
        if let Some(record) = state.records.get_mut(id) {
            patch.apply_to(record);
        }
        Ok(())
    }

    async fn subscribe(&self, _status: RecordStatus) -> Result<Subscription, StoreError> {
        self.feed
            .lock()
            .await
            .take()
            .map(Subscription::from_receiver)
            .ok_or_else(|| StoreError::Backend("no feed prepared".into()))
    }

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<SurveyRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.submitted_at);
        Ok(records)
    }
}

pub enum RenderResponse {
    Ok,
    Fail(String),
    Panic(&'static str),
}

#[derive(Default)]
pub struct RecordingRenderer {
    journal: Journal,
    responses: Arc<Mutex<VecDeque<RenderResponse>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingRenderer {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub async fn script(&self, responses: Vec<RenderResponse>) {
        self.responses.lock().await.extend(responses);
    }

    /// Customer names rendered, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RenderService for RecordingRenderer {
    async fn render(&self, survey: &SurveyData) -> Result<Artifact, RenderError> {
        let name = survey.customer.name.clone();
        self.journal.lock().await.push(format!("render:{name}"));
        self.calls.lock().await.push(name);
        tokio::task::yield_now().await;

        let response = self.responses.lock().await.pop_front();
        match response {
            None | Some(RenderResponse::Ok) => {
                let display_name = slugify(&survey.customer.name);
                Ok(Artifact {
                    path: PathBuf::from(format!("/tmp/reports/Relatorio_{display_name}.pdf")),
                    display_name,
                })
            }
            Some(RenderResponse::Fail(message)) => Err(RenderError::Other(message)),
            Some(RenderResponse::Panic(message)) => panic!("{message}"),
        }
    }
}

/// (recipient, name, attachment file name)
pub type SendCall = (String, String, String);

#[derive(Default)]
pub struct RecordingMailer {
    journal: Journal,
    responses: Arc<Mutex<VecDeque<Result<(), String>>>>,
    calls: Arc<Mutex<Vec<SendCall>>>,
}

impl RecordingMailer {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub async fn script(&self, responses: Vec<Result<(), String>>) {
        self.responses.lock().await.extend(responses);
    }

    pub async fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl EmailService for RecordingMailer {
    async fn send(
        &self,
        address: &str,
        recipient_name: &str,
        artifact: &Artifact,
    ) -> Result<(), NotifyError> {
        self.journal.lock().await.push(format!("email:{address}"));
        self.calls.lock().await.push((
            address.to_string(),
            recipient_name.to_string(),
            artifact.file_name(),
        ));
        let response = self.responses.lock().await.pop_front();
        response.unwrap_or(Ok(())).map_err(NotifyError::Email)
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    journal: Journal,
    gate: ReadinessGate,
    responses: Arc<Mutex<VecDeque<Result<(), String>>>>,
    calls: Arc<Mutex<Vec<SendCall>>>,
}

impl RecordingMessenger {
    /// Messenger whose gate starts open.
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            gate: ReadinessGate::ready(),
            ..Default::default()
        }
    }

    pub fn not_ready(journal: Journal) -> Self {
        Self {
            journal,
            gate: ReadinessGate::new(),
            ..Default::default()
        }
    }

    pub fn gate(&self) -> ReadinessGate {
        self.gate.clone()
    }

    pub async fn script(&self, responses: Vec<Result<(), String>>) {
        self.responses.lock().await.extend(responses);
    }

    pub async fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl MessagingService for RecordingMessenger {
    fn readiness(&self) -> &ReadinessGate {
        &self.gate
    }

    async fn send(
        &self,
        phone: &str,
        recipient_name: &str,
        artifact: &Artifact,
    ) -> Result<(), NotifyError> {
        self.journal.lock().await.push(format!("whats:{phone}"));
        self.calls.lock().await.push((
            phone.to_string(),
            recipient_name.to_string(),
            artifact.file_name(),
        ));
        let response = self.responses.lock().await.pop_front();
        response.unwrap_or(Ok(())).map_err(NotifyError::Messaging)
    }
}

/// All fakes wired to one journal.
pub struct Harness {
    pub journal: Journal,
    pub store: Arc<MemoryStore>,
    pub renderer: Arc<RecordingRenderer>,
    pub mailer: Arc<RecordingMailer>,
    pub messenger: Arc<RecordingMessenger>,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self::with_messenger(RecordingMessenger::new(journal.clone()), journal)
    }

    pub fn with_messenger(messenger: RecordingMessenger, journal: Journal) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(journal.clone())),
            renderer: Arc::new(RecordingRenderer::new(journal.clone())),
            mailer: Arc::new(RecordingMailer::new(journal.clone())),
            messenger: Arc::new(messenger),
            journal,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.store.clone(),
            self.renderer.clone(),
            self.mailer.clone(),
            self.messenger.clone(),
        )
    }

    pub fn processor(&self) -> SequentialProcessor {
        SequentialProcessor::new(self.pipeline())
    }

    pub async fn journal(&self) -> Vec<String> {
        self.journal.lock().await.clone()
    }
}

pub fn survey(name: &str, phone: &str, email: Option<&str>) -> SurveyData {
    SurveyData {
        customer: Customer {
            name: name.into(),
            phone: phone.into(),
            email: email.map(str::to_string),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn submitted_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap()
}

pub fn pending(id: &str, survey: SurveyData) -> SurveyRecord {
    SurveyRecord::pending(RecordId::new(id), survey, submitted_at())
}

pub fn entry(id: &str, survey: SurveyData) -> QueueEntry {
    QueueEntry::from(pending(id, survey))
}

/// Clock advancing one second per reading.
pub fn ticking_clock() -> Clock {
    let ticks = Arc::new(AtomicI64::new(0));
    Arc::new(move || submitted_at() + ChronoDuration::seconds(ticks.fetch_add(1, Ordering::SeqCst)))
}

/// Poll `check` until it holds, failing after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
