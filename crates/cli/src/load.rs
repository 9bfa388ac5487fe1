use crate::{env::EnvManager, error::CliError};
use connectors::{
    file::csv::{error::FileError, source::CsvRowSource},
    sql::capture::CaptureAdapter,
};
use engine_processing::{
    error::LoadError,
    loader::fleet::{
        AdapterFactory, CaptureFactory, FleetOptions, FleetReport, LoadFleet, PgAdapterFactory,
        WorkerTarget,
    },
};
use model::{records::row::Row, transform::mapping::FormatMode};
use planner::plan::{LoadPlan, SourceSpec, ValidatedPlan};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const INPUT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub node_index: usize,
    pub dry_run: bool,
}

pub struct LoadOutcome {
    pub report: FleetReport,
    pub rows_read: u64,
    /// Per-worker capture adapters of a dry run.
    pub captured: Vec<(WorkerTarget, CaptureAdapter)>,
}

/// Reads the JSON plan at `path`, expands `${NAME}` placeholders and
/// validates it.
pub async fn read_plan(
    path: &Path,
    env: &EnvManager,
    copies: Option<usize>,
) -> Result<ValidatedPlan, CliError> {
    let source = tokio::fs::read_to_string(path).await?;
    let mut plan = LoadPlan::from_json(&env.expand(&source)?)?;
    if let Some(copies) = copies {
        plan.copies = copies;
    }
    Ok(plan.validate()?)
}

/// Streams `input` through a fleet of workers and waits for the load to end.
pub async fn run_load(
    plan: Arc<ValidatedPlan>,
    input: &Path,
    options: &LoadOptions,
    cancel: CancellationToken,
) -> Result<LoadOutcome, CliError> {
    let spec = plan
        .source
        .clone()
        .ok_or_else(|| CliError::Config("the plan declares no source fields".into()))?;

    let capture = options.dry_run.then(CaptureFactory::new);
    let factory: Arc<dyn AdapterFactory> = match &capture {
        Some(capture) => Arc::new(capture.clone()),
        None => Arc::new(PgAdapterFactory),
    };

    // date masks need a parsed value even when the source reads lazily
    let masked: Vec<String> = plan
        .mapping
        .bindings()
        .iter()
        .filter(|b| b.format != FormatMode::PassThrough)
        .map(|b| b.stream.clone())
        .collect();

    let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let reader = spawn_reader(input.to_path_buf(), spec, masked, tx, cancel.clone());

    info!(
        input = %input.display(),
        table = %plan.target,
        dry_run = options.dry_run,
        "Loading file"
    );
    let fleet = LoadFleet::new(plan, factory)
        .with_cancel(cancel)
        .with_options(FleetOptions {
            node_index: options.node_index,
            ..Default::default()
        });
    let report = fleet.run_to_report(rx).await;

    let rows_read = reader
        .await
        .map_err(|e| CliError::Unexpected(format!("input reader panicked: {e}")))??;

    if report.failed() {
        let err = report
            .into_root_error()
            .unwrap_or_else(|| LoadError::InvalidState("failed load without an error".into()));
        return Err(err.into());
    }

    Ok(LoadOutcome {
        report,
        rows_read,
        captured: capture.map(|c| c.adapters()).unwrap_or_default(),
    })
}

/// Reads rows on a blocking thread. A read error cancels the load before the
/// channel closes, so workers never commit a partial file.
fn spawn_reader(
    path: PathBuf,
    spec: SourceSpec,
    masked: Vec<String>,
    tx: mpsc::Sender<Row>,
    cancel: CancellationToken,
) -> JoinHandle<Result<u64, FileError>> {
    tokio::task::spawn_blocking(move || {
        let result = read_into(&path, &spec, &masked, &tx, &cancel);
        if let Err(e) = &result {
            error!(input = %path.display(), error = %e, "Failed to read input");
            cancel.cancel();
        }
        drop(tx);
        result
    })
}

fn read_into(
    path: &Path,
    spec: &SourceSpec,
    masked: &[String],
    tx: &mpsc::Sender<Row>,
    cancel: &CancellationToken,
) -> Result<u64, FileError> {
    let mut source =
        CsvRowSource::open(path, spec)?.convert_fields(masked.iter().map(String::as_str));
    while let Some(row) = source.next_row()? {
        if cancel.is_cancelled() || tx.blocking_send(row).is_err() {
            break;
        }
    }
    Ok(source.rows_read())
}
