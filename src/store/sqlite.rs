use super::{ChangeBatch, RecordStore, SnapshotTracker, StoreError, Subscription};
use crate::model::{
    EmailStatus, MessagingStatus, RecordId, RecordPatch, RecordStatus, SurveyData, SurveyRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};

pub type Pool = SqlitePool;

const SELECT_COLUMNS: &str = "SELECT id, survey_data, status, email_status, whats_status, pdf_gerado, \
     mensagem_erro, enviado_em, processado_inicio_em, processado_fim_em, atualizado_em \
     FROM questionarios";

pub async fn init_pool(database_url: &str) -> Result<Pool, StoreError> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        // Enable WAL and stricter durability.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    Ok(SqlitePool::connect_with(options).await?)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

/// Timestamps are stored as `YYYY-MM-DDTHH:MM:SS.mmmZ`, the same text the
/// `enviado_em` column default produces, so TEXT ordering is chronological.
fn stored_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Survey records kept in the `questionarios` table; subscriptions poll it.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: Pool,
    poll_interval: Duration,
}

impl SqliteRecordStore {
    pub fn new(pool: Pool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Store a new submission. Used by the submission path and fixtures.
    #[instrument(skip_all, fields(record = %record.id))]
    pub async fn insert(&self, record: &SurveyRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record.survey)?;
        sqlx::query(
            "INSERT INTO questionarios (id, survey_data, status, email_status, whats_status, pdf_gerado, \
             mensagem_erro, enviado_em, processado_inicio_em, processado_fim_em, atualizado_em) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.as_str())
        .bind(payload)
        .bind(record.status.as_str())
        .bind(record.email_status.map(|s| s.as_str()))
        .bind(record.messaging_status.map(|s| s.as_str()))
        .bind(record.rendered)
        .bind(record.error_message.as_deref())
        .bind(stored_timestamp(record.submitted_at))
        .bind(record.started_at.map(stored_timestamp))
        .bind(record.finished_at.map(stored_timestamp))
        .bind(record.updated_at.map(stored_timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(record = %id))]
    pub async fn get(&self, id: &RecordId) -> Result<SurveyRecord, StoreError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(id.clone()));
        };
        record_from_row(&row)
    }
}

async fn fetch_by_status(pool: &Pool, status: RecordStatus) -> Result<Vec<SurveyRecord>, StoreError> {
    let rows = sqlx::query(&format!(
        "{SELECT_COLUMNS} WHERE status = ? ORDER BY enviado_em ASC, rowid ASC"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &SqliteRow) -> Result<SurveyRecord, StoreError> {
    let id: String = row.try_get("id")?;

    let status_str: String = row.try_get("status")?;
    let status = RecordStatus::parse_state(&status_str).ok_or_else(|| StoreError::Decode {
        id: id.clone(),
        field: "status",
        value: status_str.clone(),
    })?;

    let email_status = match row.try_get::<Option<String>, _>("email_status")? {
        Some(s) => Some(EmailStatus::parse_state(&s).ok_or_else(|| StoreError::Decode {
            id: id.clone(),
            field: "emailStatus",
            value: s.clone(),
        })?),
        None => None,
    };
    let messaging_status = match row.try_get::<Option<String>, _>("whats_status")? {
        Some(s) => Some(MessagingStatus::parse_state(&s).ok_or_else(|| StoreError::Decode {
            id: id.clone(),
            field: "whatsStatus",
            value: s.clone(),
        })?),
        None => None,
    };

    let payload: String = row.try_get("survey_data")?;
    let (survey, payload_error) = match serde_json::from_str::<SurveyData>(&payload) {
        Ok(survey) => (survey, None),
        Err(err) => {
            warn!(record = %id, error = %err, "survey payload does not decode");
            (SurveyData::default(), Some(err.to_string()))
        }
    };

    Ok(SurveyRecord {
        id: RecordId::new(id),
        survey,
        status,
        email_status,
        messaging_status,
        rendered: row.try_get::<Option<bool>, _>("pdf_gerado")?,
        error_message: row.try_get::<Option<String>, _>("mensagem_erro")?,
        submitted_at: row.try_get::<DateTime<Utc>, _>("enviado_em")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("processado_inicio_em")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("processado_fim_em")?,
        updated_at: row.try_get::<Option<DateTime<Utc>>, _>("atualizado_em")?,
        payload_error,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip_all, fields(record = %id))]
    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> Result<(), StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE questionarios SET atualizado_em = ");
        qb.push_bind(stored_timestamp(Utc::now()));
        if let Some(status) = patch.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(email) = patch.email_status {
            qb.push(", email_status = ").push_bind(email.as_str());
        }
        if let Some(messaging) = patch.messaging_status {
            qb.push(", whats_status = ").push_bind(messaging.as_str());
        }
        if let Some(rendered) = patch.rendered {
            qb.push(", pdf_gerado = ").push_bind(rendered);
        }
        if let Some(message) = &patch.error_message {
            qb.push(", mensagem_erro = ").push_bind(message.clone());
        }
        if let Some(ts) = patch.started_at {
            qb.push(", processado_inicio_em = ").push_bind(stored_timestamp(ts));
        }
        if let Some(ts) = patch.finished_at {
            qb.push(", processado_fim_em = ").push_bind(stored_timestamp(ts));
        }
        qb.push(" WHERE id = ").push_bind(id.as_str().to_string());

        let res = qb.build().execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, status: RecordStatus) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel::<Result<ChangeBatch, StoreError>>(16);
        let pool = self.pool.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut tracker = SnapshotTracker::default();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match fetch_by_status(&pool, status).await {
                    Ok(snapshot) => {
                        let batch = tracker.observe(snapshot);
                        if batch.is_empty() {
                            continue;
                        }
                        debug!(events = batch.events.len(), "change batch");
                        if tx.send(Ok(batch)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    #[instrument(skip_all, fields(status = status.as_str()))]
    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<SurveyRecord>, StoreError> {
        fetch_by_status(&self.pool, status).await
    }
}
