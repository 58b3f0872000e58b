use crate::manifest::Manifest;
use clap::{Args, Parser, Subcommand};
use eyre::{eyre, Result};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tributary_orchestrator::{LocalWorker, Orchestrator, OrchestratorConfig, OrchestratorError};
use tributary_pipeline::{
    BlockSource, EventSender, Pipeline, PipelineConfig, PipelineError, PipelineEvent, TestBlocks,
};
use tributary_primitives::BlockRange;
use tributary_storage::{LocalStore, SharedStore};

/// Process exit codes: clean, fatal configuration, fatal runtime,
/// cancelled.
pub(crate) const EXIT_CONFIG: u8 = 1;
pub(crate) const EXIT_RUNTIME: u8 = 2;
pub(crate) const EXIT_CANCELLED: u8 = 3;

/// Top-level error, carrying the process exit code.
#[derive(Debug)]
pub(crate) enum AppError {
    Config(eyre::Report),
    Runtime(eyre::Report),
    Cancelled,
}

impl AppError {
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Runtime(_) => EXIT_RUNTIME,
            Self::Cancelled => EXIT_CANCELLED,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err:?}"),
            Self::Runtime(err) => write!(f, "{err:?}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Streaming blockchain data-processing engine")]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    logs: LogArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Stream a module graph over a block range.
    Run(RunCmd),
    /// Reconstruct historical store state up to a starting block.
    Backfill(BackfillCmd),
}

#[derive(Debug, Args)]
struct LogArgs {
    /// Log filter directives, e.g. `info,pipeline=debug`.
    #[arg(long = "log.filter", global = true, default_value = "info")]
    filter: String,

    /// Emit logs as JSON.
    #[arg(long = "log.json", global = true)]
    json: bool,
}

impl LogArgs {
    fn init(&self) -> Result<()> {
        let filter = EnvFilter::try_new(&self.filter)
            .map_err(|err| eyre!("invalid log filter {:?}: {err}", self.filter))?;
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        if self.json {
            builder.json().init();
        } else {
            builder.init();
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Path of the manifest produced by the packaging tooling.
    #[arg(long)]
    manifest: PathBuf,

    /// Root of the object storage holding snapshots and cache chunks.
    #[arg(long = "storage.root", default_value = "./tributary-data")]
    storage_root: PathBuf,

    /// Block-source endpoint. Only the `dev://` generator ships with the
    /// engine; production sources plug in over the block-source contract.
    #[arg(long, default_value = "dev://sf.blocks")]
    endpoint: String,

    /// Blocks per store snapshot and cache chunk.
    #[arg(long = "save-interval", default_value_t = 1000)]
    save_interval: u64,

    /// Per-key cap in bytes on values produced by append-policy stores.
    #[arg(long = "max-append-size", default_value_t = 8 * 1024)]
    max_append_size: usize,
}

impl EngineArgs {
    fn storage(&self) -> SharedStore {
        Arc::new(LocalStore::new(&self.storage_root))
    }

    fn source(&self) -> Result<Arc<dyn BlockSource>> {
        match self.endpoint.split_once("://") {
            Some(("dev", feed)) => Ok(Arc::new(TestBlocks::new(feed))),
            _ => Err(eyre!(
                "unsupported block-source endpoint {:?}; only dev:// is built in",
                self.endpoint
            )),
        }
    }
}

#[derive(Debug, Args)]
struct RunCmd {
    #[command(flatten)]
    engine: EngineArgs,

    /// First block to process.
    #[arg(long)]
    start: u64,

    /// First block not to process.
    #[arg(long)]
    stop: u64,

    /// Modules whose outputs are printed, comma separated. Defaults to the
    /// last module of the graph.
    #[arg(long, value_delimiter = ',')]
    outputs: Vec<String>,
}

#[derive(Debug, Args)]
struct BackfillCmd {
    #[command(flatten)]
    engine: EngineArgs,

    /// Block the stores must be reconstructed up to.
    #[arg(long = "request-start")]
    request_start: u64,

    /// Upper bound on blocks covered by one sub-request.
    #[arg(long = "sub-request-split", default_value_t = 10_000)]
    sub_request_split: u64,

    /// Concurrent sub-requests.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

impl Cli {
    pub(crate) fn run(self) -> Result<(), AppError> {
        self.logs.init().map_err(AppError::Config)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::Config(err.into()))?;

        match self.command {
            Commands::Run(cmd) => runtime.block_on(cmd.execute()),
            Commands::Backfill(cmd) => runtime.block_on(cmd.execute()),
        }
    }
}

/// Cancels the returned token on ctrl-c.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let for_signal = token.clone();
    let _watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "tributary", "interrupt received, shutting down");
            for_signal.cancel();
        }
    });
    token
}

impl RunCmd {
    async fn execute(self) -> Result<(), AppError> {
        if self.stop <= self.start {
            return Err(AppError::Config(eyre!(
                "--stop ({}) must be greater than --start ({})",
                self.stop,
                self.start
            )));
        }
        let (graph, codes) =
            Manifest::load(&self.engine.manifest).map_err(AppError::Config)?;
        let source = self.engine.source().map_err(AppError::Config)?;

        let outputs = if self.outputs.is_empty() {
            graph.execution_order().last().cloned().into_iter().collect()
        } else {
            self.outputs.clone()
        };

        let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    PipelineEvent::BlockProcessed { clock, outputs, .. } => {
                        for output in outputs {
                            info!(
                                target: "tributary",
                                block = clock.number,
                                module = %output.name,
                                logs = output.logs.len(),
                                "module output"
                            );
                        }
                    }
                    PipelineEvent::IntervalSaved { boundary } => {
                        info!(target: "tributary", boundary, "interval sealed");
                    }
                }
            }
        });

        let mut config = PipelineConfig::live(self.engine.save_interval, outputs);
        config.max_append_size = self.engine.max_append_size;
        let mut pipeline = Pipeline::new(
            config,
            &graph,
            &codes,
            self.engine.storage(),
            EventSender::new(tx),
        )
        .map_err(pipeline_error)?;

        let result = pipeline
            .run(
                source.as_ref(),
                BlockRange::new(self.start, self.stop),
                cancel_on_ctrl_c(),
            )
            .await
            .map_err(pipeline_error);
        let _ = printer.await;
        result
    }
}

impl BackfillCmd {
    async fn execute(self) -> Result<(), AppError> {
        let (graph, codes) =
            Manifest::load(&self.engine.manifest).map_err(AppError::Config)?;
        let source = self.engine.source().map_err(AppError::Config)?;
        let storage = self.engine.storage();

        let worker = Arc::new(LocalWorker::new(
            graph.clone(),
            codes,
            storage.clone(),
            source,
            self.engine.save_interval,
        ));
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::new(
                self.engine.save_interval,
                self.sub_request_split,
                self.concurrency,
            ),
            graph,
            storage,
            worker,
        );

        let plan = orchestrator
            .back_process(self.request_start, cancel_on_ctrl_c())
            .await
            .map_err(orchestrator_error)?;

        for progress in plan.progress_messages() {
            let ranges: Vec<String> = progress
                .processed_ranges
                .iter()
                .map(|r| format!("[{}, {})", r.start_block, r.end_block))
                .collect();
            info!(
                target: "tributary",
                module = %progress.name,
                processed = %ranges.join(","),
                "module progress"
            );
        }
        Ok(())
    }
}

fn pipeline_error(err: PipelineError) -> AppError {
    match err {
        PipelineError::Cancelled => AppError::Cancelled,
        // Executor failures carry the guest logs and stack; render them.
        PipelineError::Executor(executor_err) => AppError::Runtime(eyre!(executor_err.render())),
        err => AppError::Runtime(eyre::Report::new(err)),
    }
}

fn orchestrator_error(err: OrchestratorError) -> AppError {
    match err {
        OrchestratorError::Cancelled => AppError::Cancelled,
        err => AppError::Runtime(eyre::Report::new(err)),
    }
}
