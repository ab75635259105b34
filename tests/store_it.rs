mod common;

use common::{eventually, survey, Journal, RecordingMailer, RecordingMessenger, RecordingRenderer};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use survey_dispatch::listener::{ChangeListener, ListenerExit};
use survey_dispatch::model::{EmailStatus, MessagingStatus, RecordId, RecordStatus, SurveyRecord};
use survey_dispatch::processor::{Pipeline, SequentialProcessor};
use survey_dispatch::store::sqlite::run_migrations;
use survey_dispatch::store::{RecordStore, SqliteRecordStore};
use tokio::sync::oneshot;

async fn setup_store() -> Arc<SqliteRecordStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteRecordStore::new(pool, Duration::from_millis(20)))
}

#[tokio::test]
async fn pending_rows_are_processed_once_through_sqlite() {
    let store = setup_store().await;
    let t0 = Utc::now();
    store
        .insert(&SurveyRecord::pending(
            RecordId::new("a"),
            survey("Ana", "11999999999", Some("a@x.com")),
            t0,
        ))
        .await
        .unwrap();
    store
        .insert(&SurveyRecord::pending(
            RecordId::new("b"),
            survey("", "11988887777", None),
            t0 + chrono::Duration::seconds(1),
        ))
        .await
        .unwrap();

    let journal = Journal::default();
    let renderer = Arc::new(RecordingRenderer::new(journal.clone()));
    let mailer = Arc::new(RecordingMailer::new(journal.clone()));
    mailer.script(vec![Err("mailbox full".into())]).await;
    let messenger = Arc::new(RecordingMessenger::new(journal.clone()));

    let processor = SequentialProcessor::new(Pipeline::new(
        store.clone(),
        renderer.clone(),
        mailer.clone(),
        messenger.clone(),
    ));
    let worker = processor.spawn();
    let listener = ChangeListener::new(processor);
    let subscription = ChangeListener::subscribe(store.as_ref()).await.unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(async move {
        listener
            .run(subscription, async {
                let _ = stop_rx.await;
            })
            .await
    });

    let watched = store.clone();
    eventually(|| {
        let store = watched.clone();
        async move {
            store
                .list_by_status(RecordStatus::Pending)
                .await
                .unwrap()
                .is_empty()
                && store
                    .list_by_status(RecordStatus::Processing)
                    .await
                    .unwrap()
                    .is_empty()
        }
    })
    .await;

    let a = store.get(&RecordId::new("a")).await.unwrap();
    assert_eq!(a.status, RecordStatus::Success);
    assert_eq!(a.rendered, Some(true));
    assert_eq!(a.email_status, Some(EmailStatus::Error));
    assert_eq!(a.messaging_status, Some(MessagingStatus::Success));
    assert!(a.started_at.is_some() && a.finished_at.is_some());
    assert!(a.updated_at.is_some());

    let b = store.get(&RecordId::new("b")).await.unwrap();
    assert_eq!(b.status, RecordStatus::Error);
    assert!(b.error_message.unwrap().contains("cliente.nome"));
    assert!(b.started_at.is_none());
    // payload is untouched by status writes
    assert_eq!(b.survey.customer.phone, "11988887777");

    // a few more poll cycles must not re-fire records that left Pending
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(renderer.calls().await, vec!["Ana".to_string()]);

    stop_tx.send(()).unwrap();
    assert_eq!(run.await.unwrap(), ListenerExit::Shutdown);
    worker.abort();
}

#[tokio::test]
async fn submitted_rows_with_numeric_fields_are_processed() {
    let store = setup_store().await;
    for (id, payload) in [
        ("num", r#"{"cliente":{"nome":"Ana","fone":"11999999999"},"carrinho":{"quantidade":6}}"#),
        ("bad", r#"{"cliente":{"nome":"Bia","fone":{"ddd":11}}}"#),
    ] {
        sqlx::query("INSERT INTO questionarios (id, survey_data) VALUES (?, ?)")
            .bind(id)
            .bind(payload)
            .execute(store.pool())
            .await
            .unwrap();
    }

    let journal = Journal::default();
    let renderer = Arc::new(RecordingRenderer::new(journal.clone()));
    let processor = SequentialProcessor::new(Pipeline::new(
        store.clone(),
        renderer.clone(),
        Arc::new(RecordingMailer::new(journal.clone())),
        Arc::new(RecordingMessenger::new(journal.clone())),
    ));
    let listener = ChangeListener::new(processor.clone());
    let mut subscription = ChangeListener::subscribe(store.as_ref()).await.unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(listener.handle_batch(&batch), 2);
    processor.drain().await;
    subscription.unsubscribe();

    assert_eq!(renderer.calls().await, vec!["Ana".to_string()]);
    let num = store.get(&RecordId::new("num")).await.unwrap();
    assert_eq!(num.status, RecordStatus::Success);
    let bad = store.get(&RecordId::new("bad")).await.unwrap();
    assert_eq!(bad.status, RecordStatus::Error);
    assert!(bad
        .error_message
        .unwrap()
        .starts_with("invalid survey payload:"));
}

#[tokio::test]
async fn success_export_reads_terminal_rows() {
    let store = setup_store().await;
    let id = RecordId::new("a");
    store
        .insert(&SurveyRecord::pending(
            id.clone(),
            survey("Ana", "(11) 99999-8888", None),
            Utc::now(),
        ))
        .await
        .unwrap();
    store
        .update(
            &id,
            &survey_dispatch::model::RecordPatch::success(
                EmailStatus::NotApplicable,
                MessagingStatus::Success,
                Utc::now(),
            ),
        )
        .await
        .unwrap();

    let records = store.list_by_status(RecordStatus::Success).await.unwrap();
    let td = tempfile::tempdir().unwrap();
    let surveys = td.path().join("questionarios.xlsx");
    let contacts = td.path().join("contatos-whatsapp.xlsx");
    assert_eq!(
        survey_dispatch::export::write_surveys_xlsx(&surveys, &records).unwrap(),
        1
    );
    assert_eq!(
        survey_dispatch::export::write_contacts_xlsx(&contacts, &records).unwrap(),
        1
    );
    assert!(surveys.exists() && contacts.exists());
}
