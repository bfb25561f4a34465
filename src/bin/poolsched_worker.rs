//! Runs one scheduler worker until interrupted.
//!
//! Usage:
//!
//! ```text
//! poolsched-worker [config-path]
//! ```
//!
//! The optional JSON file at `config-path` must deserialize into a
//! [`SchedulerConfig`]; `POOLSCHED_*` environment variables override it. The
//! worker registers itself, then alternates scheduling and running jobs for
//! every variant it has a collector for. Ctrl-C stops it after the current pass, so a running
//! collector is never interrupted.

use camino::Utf8PathBuf;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use mockable::DefaultClock;
use poolsched::config::{ConfigError, SchedulerConfig};
use poolsched::scheduler::{
    adapters::{
        FileJobLogSink,
        memory::InMemorySchedulerStore,
        postgres::{PostgresSchedulerStore, SchedulerPgPool},
    },
    domain::{IntentionKind, IntentionKindTag, UserId},
    ports::{JobLogError, SchedulerStore},
    services::{
        ExecutionService, IntentionService, Poller, SchedulingError, SchedulingService,
        WorkerRegistryService,
    },
};
use poolsched::telemetry::{self, TelemetryInitError};
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Builder;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while running the worker.
#[derive(Debug, Error)]
enum WorkerError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryInitError),
    #[error("runtime init failed: {0}")]
    RuntimeInit(#[source] std::io::Error),
    #[error("database pool init failed: {0}")]
    Pool(#[source] PoolError),
    #[error("job log directory unavailable: {0}")]
    JobLog(#[source] JobLogError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

fn main() -> Result<(), BoxError> {
    let config_path = parse_args(collect_args()?.into_iter())?;
    let config = SchedulerConfig::load(config_path.as_deref()).map_err(WorkerError::from)?;
    telemetry::init(config.log_format).map_err(WorkerError::from)?;
    let runtime = build_runtime()?;
    let outcome = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresSchedulerStore::new(build_pool(url, config.pool_size)?);
            runtime.block_on(serve(Arc::new(store), &config))
        }
        None => {
            warn!("no database_url configured; using the in-memory store");
            runtime.block_on(serve(Arc::new(InMemorySchedulerStore::new()), &config))
        }
    };
    outcome.map_err(Into::into)
}

fn collect_args() -> Result<Vec<Utf8PathBuf>, WorkerError> {
    env::args_os()
        .map(|arg_os| {
            let arg = arg_os
                .into_string()
                .map_err(|_| WorkerError::InvalidArgs("argument is not valid UTF-8".into()))?;
            Ok(Utf8PathBuf::from(arg))
        })
        .collect()
}

fn parse_args(
    mut args: impl Iterator<Item = Utf8PathBuf>,
) -> Result<Option<Utf8PathBuf>, WorkerError> {
    let _program = args.next();
    let config_path = args.next();
    if let Some(extra) = args.next() {
        let extra_arg = extra.as_str();
        return Err(WorkerError::InvalidArgs(format!(
            "unexpected extra argument: {extra_arg}"
        )));
    }
    Ok(config_path)
}

fn build_runtime() -> Result<tokio::runtime::Runtime, WorkerError> {
    Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(WorkerError::RuntimeInit)
}

fn build_pool(url: &str, max_size: u32) -> Result<SchedulerPgPool, WorkerError> {
    Pool::builder()
        .max_size(max_size)
        .build(ConnectionManager::<PgConnection>::new(url))
        .map_err(WorkerError::Pool)
}

async fn serve<S>(store: Arc<S>, config: &SchedulerConfig) -> Result<(), WorkerError>
where
    S: SchedulerStore + 'static,
{
    let clock = Arc::new(DefaultClock);
    let logs =
        Arc::new(FileJobLogSink::open_ambient(&config.job_log_dir).map_err(WorkerError::JobLog)?);
    let worker = WorkerRegistryService::new(Arc::clone(&store), Arc::clone(&clock))
        .register(config.worker_name.clone())
        .await?;

    let collectors = config.collector_registry();
    if collectors.tags().contains(&IntentionKindTag::MergeIdentities) {
        IntentionService::new(Arc::clone(&store), Arc::clone(&clock))
            .ensure_periodic(UserId::from_uuid(uuid::Uuid::nil()), IntentionKind::MergeIdentities)
            .await?;
    }

    let scheduling = SchedulingService::new(Arc::clone(&store), Arc::clone(&clock));
    let execution = ExecutionService::new(store, clock, Arc::new(collectors), logs)
        .with_intervals(config.periodic_intervals()?);
    let poller =
        Poller::new(worker.id(), scheduling, execution).with_batch_size(config.batch_size);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            return;
        }
        stop_tx.send_replace(true);
    });

    info!(worker_id = %worker.id(), name = %worker.name(), "worker started");
    while !*stop_rx.borrow() {
        let idle = match poller.poll_once().await {
            Ok(report) => {
                for (job_id, outcome) in &report.runs {
                    info!(job_id = %job_id, outcome = ?outcome, "run finished");
                }
                report.is_idle()
            }
            Err(err) => {
                error!(error = %err, "polling pass failed");
                true
            }
        };
        if idle {
            tokio::select! {
                _ = stop_rx.changed() => {}
                () = tokio::time::sleep(config.poll_interval()) => {}
            }
        }
    }
    info!(worker_id = %worker.id(), "worker stopped");
    Ok(())
}
