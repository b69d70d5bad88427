use actix::prelude::*;
use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use feed_import::catalog::{SqliteCatalogRepository, SqliteSupplierSourceRepository};
use feed_import::config::ImportConfig;
use feed_import::reconcile::{ImportRequest, Reconciler};
use feed_import::service::{AddSource, ImportService, ListSources, ReportLogger, RunImport, SetActive};
use catalog_types::source::{SupplierSource, SupplierSourceRepository};
use indicatif::ProgressStyle;
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tokio_rusqlite::Connection;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(version, about = "Supplier feed import and catalog reconciliation")]
struct Cli {
    /// SQLite database; defaults to `IMPORT_DB` or `storage/catalog.db`.
    #[arg(long)]
    db: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supplier sources.
    Sources,
    /// Register a supplier source.
    AddSource {
        #[arg(long)]
        url: String,
        #[arg(long)]
        supplier: String,
        #[arg(long)]
        inactive: bool,
    },
    /// Enable or disable a supplier source.
    SetActive {
        id: Uuid,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Import the given sources, or every active one.
    Run {
        #[arg(long)]
        dry_run: bool,
        /// Make created products visible.
        #[arg(long)]
        publish: bool,
        /// Rows imported per source.
        #[arg(long)]
        limit: Option<usize>,
        /// Fetch timeout, e.g. `30s` or `2m`.
        #[arg(long, value_parser = feed_import::parse_duration)]
        timeout: Option<Duration>,
        ids: Vec<Uuid>,
    },
}

fn progress_style() -> Option<ProgressStyle> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    match ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos:>7}/{len:7} {msg}") {
        Ok(style) => Some(style.progress_chars("=-")),
        Err(err) => {
            log::warn!("Unable to initialize progress bar: {err}");
            None
        }
    }
}

#[actix_rt::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO,html5ever=error");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(".env")?;
            envmnt::load_file(".env")?;
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    let cli = Cli::parse();
    let db = cli
        .db
        .clone()
        .unwrap_or_else(|| envmnt::get_or("IMPORT_DB", "storage/catalog.db"));
    if let Some(dir) = std::path::Path::new(&db).parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Unable to create {}", dir.display()))?;
    }
    let config = Arc::new(ImportConfig::load().await?);

    let catalog = Arc::new(SqliteCatalogRepository::init(Connection::open(&db).await?).await?);
    let sources: Arc<dyn SupplierSourceRepository> =
        Arc::new(SqliteSupplierSourceRepository::init(Connection::open(&db).await?).await?);
    let reconciler = Reconciler::new(catalog, sources.clone(), config, progress_style());
    let service = ImportService::new(reconciler, sources).start();
    let _logger = ReportLogger.start();

    match cli.command {
        Command::Sources => {
            let sources = service.send(ListSources).await??;
            println!("{}", serde_json::to_string_pretty(&sources)?);
        }
        Command::AddSource {
            url,
            supplier,
            inactive,
        } => {
            let mut source = SupplierSource::new(url, supplier);
            source.active = !inactive;
            let id = source.id;
            service.send(AddSource(source)).await??;
            println!("{id}");
        }
        Command::SetActive { id, active } => match service.send(SetActive(id, active)).await?? {
            Some(source) => println!("{}", serde_json::to_string_pretty(&source)?),
            None => return Err(anyhow::anyhow!("Supplier source {id} not found")),
        },
        Command::Run {
            dry_run,
            publish,
            limit,
            timeout,
            ids,
        } => {
            let report = service
                .send(RunImport(ImportRequest {
                    source_ids: ids,
                    item_limit: limit,
                    fetch_timeout: timeout,
                    publish_visible: publish,
                    dry_run,
                }))
                .await??;
            // let the broker deliver the summary before the system stops
            tokio::task::yield_now().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
