//! # RAG Harness CLI (`rag`)
//!
//! Operational entry point for the index catalog, the reconciler and the
//! background worker.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and run schema migrations |
//! | `rag indexes` | List index definitions in the catalog |
//! | `rag sync <index>` | Reconcile one index's search replica now |
//! | `rag backfill <index>` | Queue metadata generation for every document and drain the queue |
//! | `rag worker` | Run the background worker, queueing periodic syncs, until Ctrl-C |
//! | `rag dispatch <payload>` | Handle one raw background task payload |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rag_harness::completion::create_completion;
use rag_harness::config::{self, Config, WorkerMode};
use rag_harness::gateway::create_gateway;
use rag_harness::orchestrator::RagOrchestrator;
use rag_harness::queue::{BackgroundWorker, DirectInvokeQueue, InProcessQueue, TaskQueue};
use rag_harness::reconcile::SyncReconciler;
use rag_harness::store::sqlite::{SqliteCatalog, SqliteDocumentStore};
use rag_harness::store::{DocumentStore, IndexCatalog};
use rag_harness::tasks::TaskDispatcher;
use rag_harness::{db, migrate};

/// RAG Harness: index lifecycle, enrichment and reconciliation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "rag", version, about = "RAG Harness: index lifecycle, enrichment and search replica reconciliation")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List index definitions.
    Indexes {
        /// Page size; omit to list everything.
        #[arg(long)]
        count: Option<u32>,

        /// 1-based page number.
        #[arg(long)]
        page: Option<u32>,
    },

    /// Reconcile the search replica of one index with the document store.
    Sync {
        /// Index name.
        index: String,
    },

    /// Queue one document update per document so missing topics and
    /// keywords get generated, then wait for the queue to drain.
    Backfill {
        /// Index name.
        index: String,
    },

    /// Run the background worker until Ctrl-C.
    ///
    /// Every `--sync-every` seconds a sync is queued for each index in the
    /// catalog.
    Worker {
        #[arg(long, default_value_t = 300)]
        sync_every: u64,
    },

    /// Handle one raw background task payload, as a push trigger would.
    Dispatch {
        /// JSON message, e.g. `{"taskType":"SyncIndex","indexName":"Orders"}`.
        payload: String,
    },
}

struct App {
    catalog: Arc<dyn IndexCatalog>,
    orchestrator: Arc<RagOrchestrator>,
    reconciler: Arc<SyncReconciler>,
}

impl App {
    async fn build(cfg: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(cfg).await?;
        migrate::apply(&pool).await?;

        let catalog: Arc<dyn IndexCatalog> = Arc::new(SqliteCatalog::new(pool.clone()));
        let store: Arc<dyn DocumentStore> = Arc::new(
            SqliteDocumentStore::new(pool).with_write_retries(cfg.db.write_retries),
        );
        let search = create_gateway(&cfg.search)?;
        let completion = create_completion(&cfg.completion)?;

        let orchestrator = Arc::new(
            RagOrchestrator::new(catalog.clone(), store.clone(), search.clone(), completion)
                .with_metadata_model(cfg.completion.model.clone()),
        );
        let reconciler = Arc::new(
            SyncReconciler::new(catalog.clone(), store, search).with_batch_size(cfg.sync.batch_size),
        );

        Ok(Self {
            catalog,
            orchestrator,
            reconciler,
        })
    }

    fn dispatcher(&self, queue: Arc<dyn TaskQueue>, cfg: &Config) -> TaskDispatcher {
        TaskDispatcher::new(self.orchestrator.clone(), self.reconciler.clone(), queue)
            .with_page_size(cfg.sync.batch_size)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Indexes { count, page } => {
            let app = App::build(&cfg).await?;
            let indexes = app.orchestrator.get_all_indexes(count, page).await?;
            if indexes.is_empty() {
                println!("No indexes defined.");
            }
            for def in indexes {
                println!(
                    "{:<32} {:<22} {:<28} topic={} keywords={}",
                    def.name,
                    def.query_type,
                    def.embedding_model,
                    def.generate_topic,
                    def.generate_keywords
                );
            }
        }
        Commands::Sync { index } => {
            let app = App::build(&cfg).await?;
            let report = app.reconciler.sync_index(&index).await?;
            println!(
                "Synced {}: {} in store, {} remote before, {} deleted, {} upserted.",
                report.index, report.primary, report.remote, report.deleted, report.upserted
            );
        }
        Commands::Backfill { index } => {
            let app = App::build(&cfg).await?;
            let queue = Arc::new(InProcessQueue::new());
            let dispatcher = app.dispatcher(queue.clone(), &cfg);
            let worker = BackgroundWorker::start(queue.clone());

            let submitted = dispatcher.backfill_metadata(&index).await?;
            while !queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let stats = worker.stop().await;
            println!(
                "Backfill of {}: {} queued, {} completed, {} failed.",
                index, submitted, stats.completed, stats.failed
            );
        }
        Commands::Worker { sync_every } => {
            if cfg.worker.mode != WorkerMode::InProcess {
                bail!("the worker command requires [worker] mode = \"in_process\"");
            }
            let app = App::build(&cfg).await?;
            let queue: Arc<dyn TaskQueue> = Arc::new(InProcessQueue::new());
            let dispatcher = app.dispatcher(queue.clone(), &cfg);
            let worker = BackgroundWorker::start(queue);

            let mut ticker = tokio::time::interval(Duration::from_secs(sync_every.max(1)));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => {
                        for def in app.catalog.get_all(None, None).await? {
                            if let Err(e) = dispatcher.request_sync(&def.name) {
                                tracing::error!(index = %def.name, error = %e, "could not queue sync");
                            }
                        }
                    }
                }
            }

            let stats = worker.stop().await;
            println!(
                "Worker stopped: {} completed, {} failed.",
                stats.completed, stats.failed
            );
        }
        Commands::Dispatch { payload } => {
            let app = App::build(&cfg).await?;
            let queue: Arc<dyn TaskQueue> = match cfg.worker.mode {
                WorkerMode::InProcess => Arc::new(InProcessQueue::new()),
                WorkerMode::Direct => Arc::new(DirectInvokeQueue::new()),
            };
            app.dispatcher(queue, &cfg).handle_payload(&payload).await?;
            println!("Task handled.");
        }
    }

    Ok(())
}
