use super::{caption, whatsapp_number, MessagingService, NotifyError, ReadinessGate};
use crate::config::WhatsApp as WhatsAppConfig;
use crate::render::Artifact;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/";

/// Channel B: WhatsApp Cloud API, document messages with an uploaded PDF.
#[derive(Clone)]
pub struct WhatsAppClient {
    http: Client,
    base_url: Url,
    token: String,
    api_version: String,
    phone_number_id: String,
    readiness: ReadinessGate,
}

impl fmt::Debug for WhatsAppClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhatsAppClient")
            .field("base_url", &self.base_url)
            .field("phone_number_id", &self.phone_number_id)
            .field("ready", &self.readiness.is_ready())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

impl WhatsAppClient {
    pub fn new(cfg: &WhatsAppConfig) -> Result<Self> {
        let base_url = Url::parse(GRAPH_API_BASE).context("invalid default Graph API URL")?;
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &WhatsAppConfig, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("survey-dispatch/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: cfg.token.clone(),
            api_version: cfg.api_version.clone(),
            phone_number_id: cfg.phone_number_id.clone(),
            readiness: ReadinessGate::new(),
        })
    }

    fn endpoint(&self, resource: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}/{}/{}", self.api_version, self.phone_number_id, resource))
            .context("invalid Graph API base URL")
    }

    pub fn build_message_request(&self, body: &Value) -> Result<reqwest::Request> {
        self.http
            .post(self.endpoint("messages")?)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build message request")
    }

    /// Upload the PDF and return the media id to reference in a message.
    pub async fn upload_media(&self, file_name: &str, pdf: Vec<u8>) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", "application/pdf")
            .part(
                "file",
                reqwest::multipart::Part::bytes(pdf)
                    .file_name(file_name.to_string())
                    .mime_str("application/pdf")?,
            );
        let res = self
            .http
            .post(self.endpoint("media")?)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .context("failed to reach WhatsApp media endpoint")?;
        let payload: MediaUploadResponse = read_json(res, "media upload").await?;
        debug!(media_id = %payload.id, file_name, "media uploaded");
        Ok(payload.id)
    }

    pub async fn send_document(
        &self,
        to: &str,
        media_id: &str,
        file_name: &str,
        caption: &str,
    ) -> Result<String> {
        let body = build_document_message(to, media_id, file_name, caption);
        let request = self.build_message_request(&body)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach WhatsApp messages endpoint")?;
        let payload: MessageResponse = read_json(res, "send message").await?;
        payload
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| anyhow!("WhatsApp response carried no message id"))
    }

    /// One readiness check: the configured phone number resource must be readable.
    pub async fn probe(&self) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("{}/{}", self.api_version, self.phone_number_id))
            .context("invalid Graph API base URL")?;
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to reach WhatsApp")?;
        let _: Value = read_json(res, "phone number lookup").await?;
        Ok(())
    }

    /// Probe until the channel answers, then open the readiness gate.
    pub fn spawn_readiness_probe(&self, retry: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                match client.probe().await {
                    Ok(()) => {
                        client.readiness.mark_ready();
                        info!("WhatsApp channel ready");
                        return;
                    }
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), retry_ms = retry.as_millis() as u64, "WhatsApp channel not ready");
                        tokio::time::sleep(retry).await;
                    }
                }
            }
        })
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(res: Response, what: &str) -> Result<T> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        warn!(%status, body = %body, "WhatsApp API error on {what}");
        return Err(anyhow!("WhatsApp {what} failed {status}: {body}"));
    }
    res.json::<T>()
        .await
        .with_context(|| format!("invalid WhatsApp {what} response"))
}

pub fn build_document_message(to: &str, media_id: &str, file_name: &str, caption: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "document",
        "document": {
            "id": media_id,
            "filename": file_name,
            "caption": caption,
        }
    })
}

#[async_trait]
impl MessagingService for WhatsAppClient {
    fn readiness(&self) -> &ReadinessGate {
        &self.readiness
    }

    async fn send(
        &self,
        phone: &str,
        recipient_name: &str,
        artifact: &Artifact,
    ) -> Result<(), NotifyError> {
        let to = whatsapp_number(phone).ok_or_else(|| NotifyError::InvalidPhone(phone.to_string()))?;
        let pdf = tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| NotifyError::Artifact {
                path: artifact.path.clone(),
                source,
            })?;
        let file_name = artifact.file_name();

        let media_id = self
            .upload_media(&file_name, pdf)
            .await
            .map_err(|err| NotifyError::Messaging(format!("{err:#}")))?;
        let message_id = self
            .send_document(&to, &media_id, &file_name, &caption(recipient_name))
            .await
            .map_err(|err| NotifyError::Messaging(format!("{err:#}")))?;
        info!(to = %to, message_id = %message_id, "report sent over WhatsApp");
        Ok(())
    }
}
