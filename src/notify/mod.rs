//! Delivery channels for rendered reports: email (A) and WhatsApp (B).

pub mod email;
pub mod whatsapp;

pub use email::SmtpMailer;
pub use whatsapp::WhatsAppClient;

use crate::model::phone_digits;
use crate::render::Artifact;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

pub const DEFAULT_READY_CHECK_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to read report {path}: {source}")]
    Artifact {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("email delivery failed: {0}")]
    Email(String),
    #[error("messaging delivery failed: {0}")]
    Messaging(String),
    #[error("messaging channel not ready after {}s", .0.as_secs())]
    NotReady(Duration),
    #[error("invalid phone number for messaging: {0:?}")]
    InvalidPhone(String),
}

/// Greeting used as email body and message caption.
pub fn caption(recipient_name: &str) -> String {
    format!("Olá {recipient_name}, segue o seu relatório do Pit Stop Golf.")
}

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send(
        &self,
        address: &str,
        recipient_name: &str,
        artifact: &Artifact,
    ) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait MessagingService: Send + Sync {
    /// Whether the channel can accept sends yet.
    fn readiness(&self) -> &ReadinessGate;

    async fn send(
        &self,
        phone: &str,
        recipient_name: &str,
        artifact: &Artifact,
    ) -> Result<(), NotifyError>;
}

/// Shared flag flipped once a channel finished initialising.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate(Arc<AtomicBool>);

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready() -> Self {
        let gate = Self::default();
        gate.mark_ready();
        gate
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Bounded poll for a [`ReadinessGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_READY_CHECK_INTERVAL,
            ceiling: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl ReadinessPolicy {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self { interval, ceiling }
    }

    /// Returns once the gate is open, or `NotReady` when the ceiling passes first.
    pub async fn wait(&self, gate: &ReadinessGate, recipient: &str) -> Result<(), NotifyError> {
        if gate.is_ready() {
            return Ok(());
        }
        warn!(
            recipient,
            ceiling_secs = self.ceiling.as_secs(),
            "messaging channel not ready; waiting"
        );
        let start = Instant::now();
        while !gate.is_ready() && start.elapsed() < self.ceiling {
            sleep(self.interval).await;
            info!(
                recipient,
                waited_secs = start.elapsed().as_secs(),
                "still waiting for messaging channel"
            );
        }
        if gate.is_ready() {
            info!(recipient, "messaging channel became ready");
            Ok(())
        } else {
            Err(NotifyError::NotReady(self.ceiling))
        }
    }
}

/// WhatsApp recipient id for a Brazilian number: digits only, `55` prefixed, and the
/// mobile `9` after the area code dropped from 13-digit numbers.
pub fn whatsapp_number(phone: &str) -> Option<String> {
    let mut raw = phone_digits(phone);
    if raw.is_empty() {
        return None;
    }
    if !raw.starts_with("55") {
        raw.insert_str(0, "55");
    }
    if raw.len() == 13 && raw.as_bytes()[4] == b'9' {
        raw.remove(4);
    }
    Some(raw)
}
