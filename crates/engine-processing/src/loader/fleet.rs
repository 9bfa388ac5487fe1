//! Runs one load across several workers.
//!
//! Every worker owns its own connection and copy session. Rows arrive on a
//! single channel and are routed to workers round-robin, or by the partition
//! field when the plan declares partitions. Workers sharing a truncate scope
//! wait on a barrier after `init`, so no copy starts before the truncate is
//! committed.

use crate::{
    error::LoadError,
    loader::{
        context::{LoadContext, TruncateGate, TruncateScope},
        coordinator::LoadCoordinator,
    },
    metrics::{LoadMetrics, MetricsSnapshot},
};
use async_trait::async_trait;
use connectors::{
    adapter::Adapter,
    error::AdapterError,
    sql::{
        base::adapter::SqlAdapter,
        capture::{CaptureAdapter, FailPoint},
    },
};
use futures::future::join_all;
use model::records::row::Row;
use planner::plan::ValidatedPlan;
use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{Arc, Mutex},
};
use tokio::{
    sync::{Barrier, Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Where one worker connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTarget {
    pub index: usize,
    pub connection: Option<String>,
    pub partition_id: Option<String>,
}

/// Opens the destination session for one worker.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn connect(&self, target: &WorkerTarget) -> Result<Arc<dyn SqlAdapter>, LoadError>;
}

/// Connects every worker to Postgres using its target's connection string.
#[derive(Debug, Clone, Default)]
pub struct PgAdapterFactory;

#[async_trait]
impl AdapterFactory for PgAdapterFactory {
    async fn connect(&self, target: &WorkerTarget) -> Result<Arc<dyn SqlAdapter>, LoadError> {
        let conn_str = target
            .connection
            .as_deref()
            .ok_or_else(|| LoadError::Configuration("no connection configured".into()))?;
        let adapter = Adapter::sql(conn_str).await.map_err(|e| match e {
            AdapterError::Connector(err) => LoadError::Connect(err),
            other => LoadError::Configuration(other.to_string()),
        })?;
        Ok(adapter.get_sql())
    }
}

/// Hands every worker a fresh [`CaptureAdapter`] and keeps them for
/// inspection.
#[derive(Debug, Clone, Default)]
pub struct CaptureFactory {
    adapters: Arc<Mutex<Vec<(WorkerTarget, CaptureAdapter)>>>,
    fail_points: HashMap<usize, FailPoint>,
    refuse: Option<usize>,
}

impl CaptureFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects a failure into the adapter of worker `index`.
    pub fn with_fail_point(mut self, index: usize, fail_point: FailPoint) -> Self {
        self.fail_points.insert(index, fail_point);
        self
    }

    /// Makes connecting worker `index` fail.
    pub fn refusing(mut self, index: usize) -> Self {
        self.refuse = Some(index);
        self
    }

    /// Adapters handed out so far, ordered by worker index.
    pub fn adapters(&self) -> Vec<(WorkerTarget, CaptureAdapter)> {
        let mut adapters = self
            .adapters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        adapters.sort_by_key(|(target, _)| target.index);
        adapters
    }
}

#[async_trait]
impl AdapterFactory for CaptureFactory {
    async fn connect(&self, target: &WorkerTarget) -> Result<Arc<dyn SqlAdapter>, LoadError> {
        if self.refuse == Some(target.index) {
            return Err(LoadError::Connect(
                connectors::sql::base::error::ConnectorError::Refused(format!(
                    "worker {}",
                    target.index
                )),
            ));
        }

        let mut adapter = CaptureAdapter::new();
        if let Some(fail_point) = self.fail_points.get(&target.index) {
            adapter = adapter.with_fail_point(*fail_point);
        }
        self.adapters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((target.clone(), adapter.clone()));
        Ok(Arc::new(adapter))
    }
}

#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// Position of this process among the nodes running the same load.
    pub node_index: usize,
    pub channel_capacity: usize,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            node_index: 0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct WorkerReport {
    pub context: LoadContext,
    pub truncated: bool,
    /// Row count reported by the destination at end-of-copy.
    pub rows_reported: Option<u64>,
    pub metrics: MetricsSnapshot,
    pub error: Option<LoadError>,
}

#[derive(Debug, Default)]
pub struct FleetReport {
    pub workers: Vec<WorkerReport>,
}

impl FleetReport {
    pub fn totals(&self) -> MetricsSnapshot {
        self.workers
            .iter()
            .fold(MetricsSnapshot::default(), |acc, w| acc + w.metrics)
    }

    pub fn truncate_count(&self) -> usize {
        self.workers.iter().filter(|w| w.truncated).count()
    }

    pub fn failed(&self) -> bool {
        self.workers.iter().any(|w| w.error.is_some())
    }

    /// The error that started the failure, preferring a real cause over the
    /// `Stopped` errors of the siblings it cancelled.
    pub fn root_error(&self) -> Option<&LoadError> {
        self.root_index().and_then(|i| self.workers[i].error.as_ref())
    }

    pub fn into_root_error(mut self) -> Option<LoadError> {
        let index = self.root_index()?;
        self.workers[index].error.take()
    }

    fn root_index(&self) -> Option<usize> {
        let failed = || {
            self.workers
                .iter()
                .enumerate()
                .filter_map(|(i, w)| w.error.as_ref().map(|e| (i, e)))
        };
        failed()
            .find(|(_, e)| !e.is_stopped())
            .or_else(|| failed().next())
            .map(|(i, _)| i)
    }
}

pub struct LoadFleet {
    plan: Arc<ValidatedPlan>,
    factory: Arc<dyn AdapterFactory>,
    cancel: CancellationToken,
    options: FleetOptions,
    output: Option<mpsc::Sender<Row>>,
}

struct WorkerSpec {
    target: WorkerTarget,
    context: LoadContext,
    barrier: Arc<Barrier>,
}

struct Shared {
    plan: Arc<ValidatedPlan>,
    factory: Arc<dyn AdapterFactory>,
    cancel: CancellationToken,
    gate: TruncateGate,
    connect_lock: Option<Arc<AsyncMutex<()>>>,
    output: Option<mpsc::Sender<Row>>,
}

impl LoadFleet {
    pub fn new(plan: Arc<ValidatedPlan>, factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            plan,
            factory,
            cancel: CancellationToken::new(),
            options: FleetOptions::default(),
            output: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_options(mut self, options: FleetOptions) -> Self {
        self.options = options;
        self
    }

    /// Every worker forwards the rows it has written to `output`.
    pub fn with_output(mut self, output: mpsc::Sender<Row>) -> Self {
        self.output = Some(output);
        self
    }

    fn worker_specs(&self) -> Vec<WorkerSpec> {
        let plan = &self.plan;
        let copies = plan.worker_count();

        let contexts: Vec<(WorkerTarget, LoadContext)> = (0..copies)
            .map(|copy_nr| {
                let unique_nr = self.options.node_index * copies + copy_nr;
                let mut context = LoadContext::new(copy_nr, copies, unique_nr);
                let mut target = WorkerTarget {
                    index: copy_nr,
                    connection: plan.connection.clone(),
                    partition_id: None,
                };
                if let Some(partition) = plan.partitions.get(copy_nr) {
                    context = context.with_partition(partition.id.clone());
                    target.partition_id = Some(partition.id.clone());
                    if partition.connection.is_some() {
                        target.connection = partition.connection.clone();
                    }
                    if let Some(connection) = &target.connection {
                        context = context.with_destination(connection.clone());
                    }
                }
                (target, context)
            })
            .collect();

        let mut scope_sizes: HashMap<TruncateScope, usize> = HashMap::new();
        for (_, context) in &contexts {
            *scope_sizes.entry(context.truncate_scope()).or_default() += 1;
        }
        let barriers: HashMap<TruncateScope, Arc<Barrier>> = scope_sizes
            .into_iter()
            .map(|(scope, size)| (scope, Arc::new(Barrier::new(size))))
            .collect();

        contexts
            .into_iter()
            .map(|(target, context)| {
                let barrier = Arc::clone(&barriers[&context.truncate_scope()]);
                WorkerSpec {
                    target,
                    context,
                    barrier,
                }
            })
            .collect()
    }

    /// Loads every row from `input`, then waits for all workers.
    ///
    /// Returns the per-worker report on success and the root cause when any
    /// worker failed.
    pub async fn run(self, input: mpsc::Receiver<Row>) -> Result<FleetReport, LoadError> {
        let report = self.run_to_report(input).await;
        if !report.failed() {
            return Ok(report);
        }
        Err(report
            .into_root_error()
            .unwrap_or_else(|| LoadError::InvalidState("failed load without an error".into())))
    }

    /// Like [`run`](Self::run) but always returns the full report.
    pub async fn run_to_report(self, mut input: mpsc::Receiver<Row>) -> FleetReport {
        let specs = self.worker_specs();
        let worker_count = specs.len();
        info!(
            table = %self.plan.target,
            workers = worker_count,
            load_action = %self.plan.load_action,
            "Starting load"
        );

        let shared = Arc::new(Shared {
            plan: Arc::clone(&self.plan),
            factory: Arc::clone(&self.factory),
            cancel: self.cancel.clone(),
            gate: TruncateGate::new(),
            connect_lock: self
                .plan
                .unique_connections
                .then(|| Arc::new(AsyncMutex::new(()))),
            output: self.output,
        });

        let mut senders = Vec::with_capacity(worker_count);
        let mut handles: Vec<JoinHandle<WorkerReport>> = Vec::with_capacity(worker_count);
        let mut contexts = Vec::with_capacity(worker_count);
        for spec in specs {
            let (tx, rx) = mpsc::channel(self.options.channel_capacity);
            senders.push(tx);
            contexts.push(spec.context.clone());
            handles.push(tokio::spawn(run_worker(Arc::clone(&shared), spec, rx)));
        }
        drop(shared);

        let mut router = Router::new(&self.plan, &contexts);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                row = input.recv() => row,
            };
            let Some(row) = next else { break };

            let index = router.route(&row);
            if senders[index].send(row).await.is_err() {
                debug!(worker = index, "Worker stopped accepting rows, ending routing");
                break;
            }
        }
        // closing the worker channels is their end-of-input
        drop(senders);

        let mut workers = Vec::with_capacity(worker_count);
        for (joined, context) in join_all(handles).await.into_iter().zip(contexts) {
            match joined {
                Ok(report) => workers.push(report),
                Err(join_err) => {
                    error!(worker = %context, error = %join_err, "Worker task panicked");
                    self.cancel.cancel();
                    workers.push(WorkerReport {
                        context,
                        truncated: false,
                        rows_reported: None,
                        metrics: MetricsSnapshot {
                            error_count: 1,
                            ..Default::default()
                        },
                        error: Some(LoadError::InvalidState(format!(
                            "worker task panicked: {join_err}"
                        ))),
                    });
                }
            }
        }

        let report = FleetReport { workers };
        let totals = report.totals();
        if report.failed() {
            warn!(
                table = %self.plan.target,
                rows_written = totals.rows_written,
                errors = totals.error_count,
                "Load failed"
            );
        } else {
            info!(
                table = %self.plan.target,
                rows_written = totals.rows_written,
                bytes = totals.bytes_streamed,
                truncated = report.truncate_count(),
                "Load complete"
            );
        }
        report
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    spec: WorkerSpec,
    mut input: mpsc::Receiver<Row>,
) -> WorkerReport {
    let WorkerSpec {
        target,
        context,
        barrier,
    } = spec;
    let metrics = LoadMetrics::new();

    let report = |truncated: bool, rows_reported: Option<u64>, error: Option<LoadError>| {
        WorkerReport {
            context: context.clone(),
            truncated,
            rows_reported,
            metrics: metrics.snapshot(),
            error,
        }
    };

    let connected = {
        let _guard = match &shared.connect_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        shared.factory.connect(&target).await
    };
    let adapter = match connected {
        Ok(adapter) => {
            debug!(worker = %context, kind = ?adapter.kind(), "Connected");
            adapter
        }
        Err(err) => {
            error!(worker = %context, error = %err, "Failed to connect");
            metrics.increment_errors(1);
            shared.cancel.cancel();
            return report(false, None, Some(err));
        }
    };

    let coordinator = LoadCoordinator::new(Arc::clone(&shared.plan), context.clone(), adapter);
    let mut coordinator = match coordinator {
        Ok(c) => c
            .with_gate(shared.gate.clone())
            .with_cancel(shared.cancel.clone())
            .with_metrics(metrics.clone()),
        Err(err) => {
            error!(worker = %context, error = %err, "Failed to prepare load");
            metrics.increment_errors(1);
            shared.cancel.cancel();
            return report(false, None, Some(err));
        }
    };
    if let Some(output) = &shared.output {
        coordinator = coordinator.with_output(output.clone());
    }

    if let Err(err) = coordinator.init().await {
        coordinator.fail(&err).await;
        return report(coordinator.truncated(), None, Some(err));
    }

    // no copy starts before the scope's truncate is committed
    tokio::select! {
        _ = barrier.wait() => {}
        _ = shared.cancel.cancelled() => {
            let err = LoadError::Stopped("cancelled before the copy started".into());
            coordinator.fail(&err).await;
            return report(coordinator.truncated(), None, Some(err));
        }
    }

    match coordinator.run(&mut input).await {
        Ok(rows) => report(coordinator.truncated(), Some(rows), None),
        Err(err) => report(coordinator.truncated(), None, Some(err)),
    }
}

/// Picks the worker for each row.
struct Router {
    workers: usize,
    partition_field: Option<String>,
    partition_index: HashMap<String, usize>,
    next: usize,
}

impl Router {
    fn new(plan: &ValidatedPlan, contexts: &[LoadContext]) -> Self {
        let partition_index = contexts
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.partition_id.clone().map(|id| (id, i)))
            .collect();
        Self {
            workers: contexts.len().max(1),
            partition_field: plan.partition_field.clone(),
            partition_index,
            next: 0,
        }
    }

    /// Rows whose partition field equals a partition id go to that
    /// partition; other values are spread by hash and nulls go to the first
    /// worker. Without a partition field rows are dealt round-robin.
    fn route(&mut self, row: &Row) -> usize {
        let Some(field) = &self.partition_field else {
            let index = self.next % self.workers;
            self.next = self.next.wrapping_add(1);
            return index;
        };

        match row.get_by_name(field) {
            None => 0,
            Some(value) => {
                let key = value.to_string();
                if let Some(&index) = self.partition_index.get(&key) {
                    return index;
                }
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.workers as u64) as usize
            }
        }
    }
}
