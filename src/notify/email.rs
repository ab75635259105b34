use super::{caption, EmailService, NotifyError};
use crate::config::Email as EmailConfig;
use crate::render::Artifact;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::{ContentDisposition, ContentType};
use lettre::message::{Body, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub const SUBJECT: &str = "Relatório Pit Stop Golf";

const IMPLICIT_TLS_PORT: u16 = 465;

/// Channel A: SMTP relay with a single report attachment per message.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        let from: Mailbox = format!("{} <{}>", cfg.from_name, cfg.username)
            .parse()
            .context("invalid sender address")?;
        let tls_params =
            TlsParameters::new(cfg.smtp_host.clone()).context("invalid SMTP TLS parameters")?;
        let tls = if cfg.smtp_port == IMPLICIT_TLS_PORT {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Required(tls_params)
        };
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .context("invalid SMTP host")?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ))
            .tls(tls)
            .build();
        Ok(Self { transport, from })
    }
}

pub fn build_report_message(
    from: &Mailbox,
    address: &str,
    recipient_name: &str,
    attachment_name: &str,
    pdf: Vec<u8>,
) -> Result<Message> {
    let to: Mailbox = address.parse().context("invalid recipient address")?;

    let text_part = SinglePart::builder()
        .header(ContentType::TEXT_PLAIN)
        .body(caption(recipient_name));
    let pdf_part = SinglePart::builder()
        .header(ContentType::parse("application/pdf")?)
        .header(ContentDisposition::attachment(attachment_name))
        .body(Body::new(pdf));

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(SUBJECT)
        .multipart(MultiPart::mixed().singlepart(text_part).singlepart(pdf_part))
        .context("failed to build report email")
}

#[async_trait]
impl EmailService for SmtpMailer {
    async fn send(
        &self,
        address: &str,
        recipient_name: &str,
        artifact: &Artifact,
    ) -> Result<(), NotifyError> {
        let pdf = tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| NotifyError::Artifact {
                path: artifact.path.clone(),
                source,
            })?;
        let message = build_report_message(
            &self.from,
            address,
            recipient_name,
            &artifact.file_name(),
            pdf,
        )
        .map_err(|err| NotifyError::Email(format!("{err:#}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|err| NotifyError::Email(err.to_string()))?;
        info!(to = address, attachment = %artifact.file_name(), "report emailed");
        Ok(())
    }
}
