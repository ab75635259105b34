use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use survey_dispatch::config;
use survey_dispatch::dead_letter::DeadLetterLog;
use survey_dispatch::listener::{ChangeListener, ListenerExit};
use survey_dispatch::notify::{ReadinessPolicy, SmtpMailer, WhatsAppClient};
use survey_dispatch::processor::{Pipeline, SequentialProcessor};
use survey_dispatch::render::PdfRenderer;
use survey_dispatch::store::sqlite::{init_pool, run_migrations};
use survey_dispatch::store::SqliteRecordStore;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print an example config and exit
    #[arg(long)]
    print_example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example {
        print!("{}", config::example());
        return Ok(());
    }
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = init_pool(&cfg.app.database_url()).await?;
    run_migrations(&pool).await?;
    let store = Arc::new(SqliteRecordStore::new(pool, cfg.app.poll_interval()));

    let renderer = PdfRenderer::new(cfg.app.output_dir(), cfg.render.wkhtmltopdf_path.as_deref())
        .context("failed to set up PDF renderer")?;
    let mailer = SmtpMailer::from_config(&cfg.email)?;
    let whatsapp = WhatsAppClient::new(&cfg.whatsapp)?;
    let _probe = whatsapp.spawn_readiness_probe(cfg.whatsapp.probe_retry());

    let mut pipeline = Pipeline::new(
        store.clone(),
        Arc::new(renderer),
        Arc::new(mailer),
        Arc::new(whatsapp),
    )
    .with_readiness(ReadinessPolicy::new(
        cfg.whatsapp.ready_check_interval(),
        cfg.whatsapp.ready_timeout(),
    ));
    if let Some(path) = cfg.app.dead_letter_path.as_deref() {
        pipeline = pipeline.with_dead_letter(DeadLetterLog::new(path));
    }

    // Single worker; the listener only enqueues and triggers.
    let processor = SequentialProcessor::new(pipeline);
    let _worker = processor.spawn();

    let listener = ChangeListener::new(processor);
    let subscription = ChangeListener::subscribe(store.as_ref()).await?;
    info!("watching for pending surveys");

    match listener.run(subscription, interrupted()).await {
        ListenerExit::Shutdown => {}
        exit => {
            error!(?exit, "listener stopped; idle until interrupted");
            interrupted().await;
        }
    }
    info!("shutting down");
    Ok(())
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for interrupt");
    }
}
