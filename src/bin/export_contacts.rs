use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use survey_dispatch::config;
use survey_dispatch::export::{self, write_contacts_xlsx};
use survey_dispatch::model::RecordStatus;
use survey_dispatch::store::sqlite::{init_pool, run_migrations};
use survey_dispatch::store::{RecordStore, SqliteRecordStore};
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Export the WhatsApp contacts reached by delivered reports to an .xlsx spreadsheet.")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Spreadsheet to write
    #[arg(long, default_value = export::CONTACTS_FILE)]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = init_pool(&cfg.app.database_url()).await?;
    run_migrations(&pool).await?;
    let store = SqliteRecordStore::new(pool, cfg.app.poll_interval());

    // delivered reports only exist on records that finished successfully
    let records = store.list_by_status(RecordStatus::Success).await?;
    let written = write_contacts_xlsx(&args.output, &records)
        .with_context(|| format!("failed to export contacts to {}", args.output.display()))?;
    info!(rows = written, path = %args.output.display(), "contact spreadsheet written");
    Ok(())
}
