//! Survey records and the status vocabulary persisted on them.
use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on batteries charted for one cart.
pub const MAX_BATTERIES: usize = 48;

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").expect("valid regex"));

/// Strip everything but digits from a phone number as typed.
pub fn phone_digits(phone: &str) -> String {
    NON_DIGITS.replace_all(phone, "").into_owned()
}

/// Offset used for dates shown to customers and operators (São Paulo, no DST).
pub fn local_offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("valid fixed offset")
}

/// Opaque record identifier, as assigned by the submission path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    #[serde(rename = "pendente")]
    Pending,
    #[serde(rename = "processando")]
    Processing,
    #[serde(rename = "sucesso")]
    Success,
    #[serde(rename = "erro")]
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pendente",
            RecordStatus::Processing => "processando",
            RecordStatus::Success => "sucesso",
            RecordStatus::Error => "erro",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pendente" => Some(RecordStatus::Pending),
            "processando" => Some(RecordStatus::Processing),
            "sucesso" => Some(RecordStatus::Success),
            "erro" => Some(RecordStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Success | RecordStatus::Error)
    }
}

/// Outcome of the email channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmailStatus {
    #[serde(rename = "nao_aplicavel")]
    NotApplicable,
    #[serde(rename = "sucesso")]
    Success,
    #[serde(rename = "erro")]
    Error,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::NotApplicable => "nao_aplicavel",
            EmailStatus::Success => "sucesso",
            EmailStatus::Error => "erro",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "nao_aplicavel" => Some(EmailStatus::NotApplicable),
            "sucesso" => Some(EmailStatus::Success),
            "erro" => Some(EmailStatus::Error),
            _ => None,
        }
    }
}

/// Outcome of the messaging channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessagingStatus {
    #[serde(rename = "nao_enviado")]
    NotSent,
    #[serde(rename = "sucesso")]
    Success,
    #[serde(rename = "erro")]
    Error,
    #[serde(rename = "sem_numero")]
    NoRecipient,
}

impl MessagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingStatus::NotSent => "nao_enviado",
            MessagingStatus::Success => "sucesso",
            MessagingStatus::Error => "erro",
            MessagingStatus::NoRecipient => "sem_numero",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "nao_enviado" => Some(MessagingStatus::NotSent),
            "sucesso" => Some(MessagingStatus::Success),
            "erro" => Some(MessagingStatus::Error),
            "sem_numero" => Some(MessagingStatus::NoRecipient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Employee {
    #[serde(rename = "nome", deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(rename = "cidade", deserialize_with = "lenient::string")]
    pub city: String,
    #[serde(rename = "estado", deserialize_with = "lenient::string")]
    pub state: String,
    #[serde(rename = "clube", deserialize_with = "lenient::string")]
    pub club: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Customer {
    #[serde(rename = "nome", deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(rename = "fone", deserialize_with = "lenient::string")]
    pub phone: String,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub email: Option<String>,
    #[serde(rename = "clube", deserialize_with = "lenient::string")]
    pub club: String,
    #[serde(rename = "cidade", deserialize_with = "lenient::string")]
    pub city: String,
    #[serde(rename = "estado", deserialize_with = "lenient::string")]
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cart {
    #[serde(rename = "marca", deserialize_with = "lenient::string")]
    pub brand: String,
    #[serde(rename = "modelo", deserialize_with = "lenient::opt_string")]
    pub model: Option<String>,
    #[serde(rename = "numero", deserialize_with = "lenient::opt_string")]
    pub number: Option<String>,
    #[serde(rename = "cor", deserialize_with = "lenient::opt_string")]
    pub color: Option<String>,
    #[serde(rename = "marcaBat", deserialize_with = "lenient::string")]
    pub battery_brand: String,
    #[serde(rename = "tipo", deserialize_with = "lenient::string")]
    pub battery_type: String,
    #[serde(rename = "tensao", deserialize_with = "lenient::string")]
    pub battery_voltage: String,
    #[serde(rename = "quantidade", deserialize_with = "lenient::string")]
    pub battery_count: String,
    #[serde(rename = "dono", deserialize_with = "lenient::string")]
    pub owner: String,
}

impl Cart {
    /// Number of batteries declared on the cart, capped at [`MAX_BATTERIES`];
    /// unparsable counts read as zero.
    pub fn battery_count(&self) -> usize {
        self.battery_count
            .trim()
            .parse::<usize>()
            .map_or(0, |n| n.min(MAX_BATTERIES))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryCheck {
    #[serde(rename = "caixa", deserialize_with = "lenient::string")]
    pub case: String,
    #[serde(rename = "parafusos", deserialize_with = "lenient::string")]
    pub screws: String,
    #[serde(rename = "terminais", deserialize_with = "lenient::string")]
    pub terminals: String,
    #[serde(rename = "polos", deserialize_with = "lenient::string")]
    pub poles: String,
    #[serde(rename = "nivel", deserialize_with = "lenient::string")]
    pub level: String,
}

/// The submitted questionnaire, forwarded untouched to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyData {
    #[serde(rename = "usuario")]
    pub employee: Employee,
    #[serde(rename = "cliente")]
    pub customer: Customer,
    #[serde(rename = "carrinho")]
    pub cart: Cart,
    #[serde(rename = "tensao", deserialize_with = "lenient::string_list")]
    pub voltages: Vec<String>,
    #[serde(rename = "densidade", deserialize_with = "lenient::opt_string_list")]
    pub densities: Option<Vec<String>>,
    #[serde(rename = "comentario", deserialize_with = "lenient::opt_string")]
    pub comment: Option<String>,
    #[serde(rename = "verificarBateria")]
    pub battery_check: BatteryCheck,
}

impl SurveyData {
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

impl Customer {
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    pub fn phone(&self) -> Option<&str> {
        Some(self.phone.trim()).filter(|p| !p.is_empty())
    }
}

/// One survey submission as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub id: RecordId,
    #[serde(rename = "surveyData")]
    pub survey: SurveyData,
    pub status: RecordStatus,
    #[serde(rename = "emailStatus")]
    pub email_status: Option<EmailStatus>,
    #[serde(rename = "whatsStatus")]
    pub messaging_status: Option<MessagingStatus>,
    #[serde(rename = "pdfGerado")]
    pub rendered: Option<bool>,
    #[serde(rename = "mensagemErro")]
    pub error_message: Option<String>,
    #[serde(rename = "enviadoEm")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "processadoInicioEm")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "processadoFimEm")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(rename = "atualizadoEm")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Set when the stored payload could not be decoded; `survey` is empty then.
    #[serde(skip)]
    pub payload_error: Option<String>,
}

impl SurveyRecord {
    /// A freshly submitted record awaiting processing.
    pub fn pending(id: RecordId, survey: SurveyData, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            survey,
            status: RecordStatus::Pending,
            email_status: None,
            messaging_status: None,
            rendered: None,
            error_message: None,
            submitted_at,
            started_at: None,
            finished_at: None,
            updated_at: None,
            payload_error: None,
        }
    }
}

/// Partial update applied to a record; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    #[serde(rename = "emailStatus", skip_serializing_if = "Option::is_none")]
    pub email_status: Option<EmailStatus>,
    #[serde(rename = "whatsStatus", skip_serializing_if = "Option::is_none")]
    pub messaging_status: Option<MessagingStatus>,
    #[serde(rename = "pdfGerado", skip_serializing_if = "Option::is_none")]
    pub rendered: Option<bool>,
    #[serde(rename = "mensagemErro", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(rename = "processadoInicioEm", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "processadoFimEm", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn processing(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(RecordStatus::Processing),
            started_at: Some(now),
            ..Default::default()
        }
    }

    pub fn success(email: EmailStatus, messaging: MessagingStatus, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(RecordStatus::Success),
            rendered: Some(true),
            email_status: Some(email),
            messaging_status: Some(messaging),
            finished_at: Some(now),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(RecordStatus::Error),
            error_message: Some(message.into()),
            finished_at: Some(now),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &RecordPatch::default()
    }

    /// Apply the patch onto an in-memory record.
    pub fn apply_to(&self, record: &mut SurveyRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(email) = self.email_status {
            record.email_status = Some(email);
        }
        if let Some(messaging) = self.messaging_status {
            record.messaging_status = Some(messaging);
        }
        if let Some(rendered) = self.rendered {
            record.rendered = Some(rendered);
        }
        if let Some(message) = &self.error_message {
            record.error_message = Some(message.clone());
        }
        if let Some(ts) = self.started_at {
            record.started_at = Some(ts);
        }
        if let Some(ts) = self.finished_at {
            record.finished_at = Some(ts);
        }
    }
}

/// Reference to a record awaiting processing, with the payload as observed at enqueue time.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: RecordId,
    pub record: SurveyRecord,
}

impl From<SurveyRecord> for QueueEntry {
    fn from(record: SurveyRecord) -> Self {
        Self {
            id: record.id.clone(),
            record,
        }
    }
}

/// Submission fields arrive from a web form; scalars may be typed as numbers or booleans.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn scalar<E: Error>(value: Value) -> Result<Option<String>, E> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            Value::Array(_) => Err(E::custom("expected a string or number, found an array")),
            Value::Object(_) => Err(E::custom("expected a string or number, found an object")),
        }
    }

    fn list<E: Error>(value: Value) -> Result<Option<Vec<String>>, E> {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) => items
                .into_iter()
                .map(|v| scalar(v).map(Option::unwrap_or_default))
                .collect::<Result<Vec<_>, E>>()
                .map(Some),
            other => scalar(other).map(|s| s.map(|s| vec![s])),
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        scalar(Value::deserialize(d)?).map(Option::unwrap_or_default)
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        scalar(Value::deserialize(d)?)
    }

    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        list(Value::deserialize(d)?).map(Option::unwrap_or_default)
    }

    pub fn opt_string_list<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Vec<String>>, D::Error> {
        list(Value::deserialize(d)?)
    }
}
