//! Bounded-concurrency validation of many modules
//!
//! Architecture: Application Service - the scheduler fans module pipelines out over tokio
//! - A semaphore bounds how many pipelines run at once; permits are taken in input order
//! - Each pipeline runs on the blocking pool under its own timeout
//! - Workers send immutable outcomes to a single collector, the only writer of the result
//! - Failures are captured per module; with `continue_on_error` off the first failure
//!   stops dispatch while already-running pipelines finish
//! - With a shared graph, facts are gathered through the same semaphore first; each
//!   module's facts are then reused by its own pipeline within what is left of its timeout

use crate::config::BatchConfig;
use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::facts::ModuleFacts;
use crate::domain::graph::GraphAnalysis;
use crate::domain::results::ValidationReport;
use crate::orchestrator::{ValidationOptions, ValidationOrchestrator};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

/// Why a module has no report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    PathNotFound,
    /// Any other error returned by the pipeline
    Pipeline,
    Panicked,
    /// Never dispatched because an earlier module failed
    Cancelled,
}

impl FailureKind {
    fn from_error(error: &GuardianError) -> Self {
        match error {
            GuardianError::PathNotFound { .. } => Self::PathNotFound,
            GuardianError::Timeout { .. } => Self::Timeout,
            _ => Self::Pipeline,
        }
    }
}

/// A module that produced no report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Modules finished so far, including failures
    pub completed: usize,
    pub total: usize,
}

/// Best-effort notifications; a panicking observer is ignored
pub trait BatchObserver: Send + Sync {
    fn on_progress(&self, _progress: BatchProgress) {}

    fn on_item_complete(&self, _path: &Path, _report: &ValidationReport) {}
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_concurrent: usize,
    /// Per-module limit, covering fact gathering and validation together
    pub timeout: Duration,
    pub continue_on_error: bool,
    /// Analyse all modules as one graph. No module is validated until every
    /// module's facts have been read or timed out.
    pub shared_graph: bool,
    pub validation: ValidationOptions,
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            continue_on_error: config.continue_on_error,
            shared_graph: config.shared_graph,
            validation: ValidationOptions::default(),
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

/// Everything a batch run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Reports in input order
    pub reports: Vec<ValidationReport>,
    /// Failures in input order
    pub failed_items: Vec<FailedItem>,
    pub total: usize,
    /// Most pipelines observed running at once
    pub peak_concurrency: usize,
    pub cancelled: bool,
    /// The shared graph, when one was built
    pub graph: Option<GraphAnalysis>,
    pub elapsed_ms: u64,
}

impl BatchOutcome {
    pub fn completed(&self) -> usize {
        self.reports.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_items.is_empty()
    }

    /// 0 when every module passed and none failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            return 1;
        }
        self.reports.iter().map(ValidationReport::exit_code).max().unwrap_or(0)
    }
}

/// One unit of blocking work handed to the dispatcher
struct WorkItem<I> {
    index: usize,
    path: PathBuf,
    input: I,
    /// Time this item may still spend
    budget: Duration,
}

/// What a pipeline starts from
enum PipelineInput {
    Fresh,
    Facts(Box<ModuleFacts>, Duration),
}

enum Step<T> {
    /// The value and the time spent producing it
    Done(T, Duration),
    Failed(FailureKind, String),
}

type Finished<T> = (usize, PathBuf, Step<T>);

/// Decrements the in-flight counter even if the pipeline panics
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared state cloned into the dispatcher and every worker
#[derive(Clone)]
struct RunContext {
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    stop_on_error: bool,
    cancelled: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Single writer of the batch result
struct Collector<'a> {
    scheduler: &'a BatchScheduler,
    total: usize,
    completed: usize,
    slots: Vec<Option<ValidationReport>>,
    failures: Vec<(usize, FailedItem)>,
}

impl<'a> Collector<'a> {
    fn new(scheduler: &'a BatchScheduler, total: usize) -> Self {
        Self {
            scheduler,
            total,
            completed: 0,
            slots: (0..total).map(|_| None).collect(),
            failures: Vec::new(),
        }
    }

    fn report(&mut self, index: usize, path: &Path, report: ValidationReport) {
        self.scheduler.notify(|observer| observer.on_item_complete(path, &report));
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(report);
        }
        self.advance();
    }

    fn fail(&mut self, index: usize, path: PathBuf, kind: FailureKind, message: String) {
        if kind != FailureKind::Cancelled {
            tracing::warn!("Module {} failed ({:?}): {}", path.display(), kind, message);
        }
        self.failures.push((index, FailedItem { path, kind, message }));
        self.advance();
    }

    fn advance(&mut self) {
        self.completed += 1;
        let progress = BatchProgress {
            completed: self.completed,
            total: self.total,
        };
        self.scheduler.notify(|observer| observer.on_progress(progress));
    }
}

/// Runs the validation pipeline across many modules
pub struct BatchScheduler {
    orchestrator: Arc<ValidationOrchestrator>,
    observer: Option<Arc<dyn BatchObserver>>,
}

impl BatchScheduler {
    pub fn new(orchestrator: Arc<ValidationOrchestrator>) -> Self {
        Self {
            orchestrator,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validate every path; never fails as a whole
    pub async fn run(&self, paths: Vec<PathBuf>, options: &BatchOptions) -> BatchOutcome {
        let start = Instant::now();
        let total = paths.len();
        let max_concurrent = options.max_concurrent.max(1);
        tracing::info!("Validating {} modules with up to {} in flight", total, max_concurrent);

        let context = RunContext {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            timeout: options.timeout,
            stop_on_error: !options.continue_on_error,
            cancelled: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let mut collector = Collector::new(self, total);

        let (graph, items) = if options.shared_graph && total > 1 {
            self.gather_facts(paths, &context, &mut collector).await
        } else {
            let items = paths
                .into_iter()
                .enumerate()
                .map(|(index, path)| WorkItem {
                    index,
                    path,
                    input: PipelineInput::Fresh,
                    budget: options.timeout,
                })
                .collect();
            (None, items)
        };

        let orchestrator = self.orchestrator.clone();
        let validation = options.validation.clone();
        let shared = graph.clone();
        let pipeline = move |path: &Path, input: PipelineInput| -> GuardianResult<ValidationReport> {
            match input {
                PipelineInput::Fresh => orchestrator.validate_with_graph(path, &validation, shared.as_deref()),
                PipelineInput::Facts(facts, read_time) => {
                    let mut report = orchestrator.validate_facts(&facts, &validation, shared.as_deref());
                    report.metrics.probe_time_ms = u64::try_from(read_time.as_millis()).unwrap_or(u64::MAX);
                    Ok(report)
                }
            }
        };

        let (sender, mut receiver) = mpsc::unbounded_channel::<Finished<ValidationReport>>();
        tokio::spawn(dispatch(items, context.clone(), Arc::new(pipeline), sender));
        while let Some((index, path, step)) = receiver.recv().await {
            match step {
                Step::Done(report, _) => collector.report(index, &path, report),
                Step::Failed(kind, message) => collector.fail(index, path, kind, message),
            }
        }

        let Collector { slots, mut failures, .. } = collector;
        failures.sort_by_key(|(index, _)| *index);
        let outcome = BatchOutcome {
            reports: slots.into_iter().flatten().collect(),
            failed_items: failures.into_iter().map(|(_, item)| item).collect(),
            total,
            peak_concurrency: context.peak.load(Ordering::SeqCst),
            cancelled: context.cancelled.load(Ordering::SeqCst),
            graph: graph.map(|g| g.as_ref().clone()),
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        tracing::info!(
            "Batch finished: {} reports, {} failures in {}ms",
            outcome.completed(),
            outcome.failed_items.len(),
            outcome.elapsed_ms
        );
        outcome
    }

    /// Read every module's facts under the same permits and per-module timeouts,
    /// then analyse the modules that were read as one graph
    async fn gather_facts(
        &self,
        paths: Vec<PathBuf>,
        context: &RunContext,
        collector: &mut Collector<'_>,
    ) -> (Option<Arc<GraphAnalysis>>, Vec<WorkItem<PipelineInput>>) {
        let items = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| WorkItem {
                index,
                path,
                input: (),
                budget: context.timeout,
            })
            .collect();

        let orchestrator = self.orchestrator.clone();
        let read = move |path: &Path, _: ()| orchestrator.probe(path);

        let (sender, mut receiver) = mpsc::unbounded_channel::<Finished<ModuleFacts>>();
        tokio::spawn(dispatch(items, context.clone(), Arc::new(read), sender));

        let mut gathered: Vec<(usize, PathBuf, Duration)> = Vec::new();
        let mut facts: Vec<ModuleFacts> = Vec::new();
        while let Some((index, path, step)) = receiver.recv().await {
            match step {
                Step::Done(module, elapsed) => {
                    gathered.push((index, path, elapsed));
                    facts.push(module);
                }
                Step::Failed(kind, message) => collector.fail(index, path, kind, message),
            }
        }

        let orchestrator = self.orchestrator.clone();
        let analysis = tokio::task::spawn_blocking(move || {
            let analysis = orchestrator.analyze_graph(&facts);
            (analysis, facts)
        })
        .await;

        let (analysis, facts) = match analysis {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!("Shared graph analysis panicked: {}", e);
                for (index, path, _) in gathered {
                    collector.fail(index, path, FailureKind::Panicked, e.to_string());
                }
                return (None, Vec::new());
            }
        };
        tracing::debug!(
            "Shared graph: {} nodes, {} cycles",
            analysis.metrics.node_count,
            analysis.metrics.cycle_count
        );

        let mut items: Vec<WorkItem<PipelineInput>> = gathered
            .into_iter()
            .zip(facts)
            .map(|((index, path, elapsed), module)| WorkItem {
                index,
                path,
                input: PipelineInput::Facts(Box::new(module), elapsed),
                budget: context.timeout.saturating_sub(elapsed),
            })
            .collect();
        items.sort_by_key(|item| item.index);

        (Some(Arc::new(analysis)), items)
    }

    fn notify(&self, call: impl FnOnce(&dyn BatchObserver)) {
        if let Some(observer) = &self.observer {
            if panic::catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))).is_err() {
                tracing::warn!("Batch observer panicked; notification dropped");
            }
        }
    }
}

/// Hand out permits in input order; after a cancelling failure the rest are skipped
async fn dispatch<I, T, F>(
    items: Vec<WorkItem<I>>,
    context: RunContext,
    job: Arc<F>,
    sender: mpsc::UnboundedSender<Finished<T>>,
) where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(&Path, I) -> GuardianResult<T> + Send + Sync + 'static,
{
    for WorkItem {
        index,
        path,
        input,
        budget,
    } in items
    {
        let permit = match context.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                let _ = sender.send((index, path, Step::Failed(FailureKind::Pipeline, e.to_string())));
                continue;
            }
        };

        if context.cancelled.load(Ordering::SeqCst) {
            let message = "not started: an earlier module failed".to_string();
            let _ = sender.send((index, path, Step::Failed(FailureKind::Cancelled, message)));
            continue;
        }

        let context = context.clone();
        let sender = sender.clone();
        let job = job.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let worker_path = path.clone();
            let worker_context = context.clone();
            let worker = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let _in_flight = InFlight::enter(&worker_context.in_flight, &worker_context.peak);
                let result = job(&worker_path, input);
                if result.is_err() && worker_context.stop_on_error {
                    worker_context.cancelled.store(true, Ordering::SeqCst);
                }
                result
            });

            let step = match tokio::time::timeout(budget, worker).await {
                Ok(Ok(Ok(value))) => Step::Done(value, started.elapsed()),
                Ok(Ok(Err(e))) => Step::Failed(FailureKind::from_error(&e), e.to_string()),
                Ok(Err(e)) => Step::Failed(FailureKind::Panicked, e.to_string()),
                Err(_) => {
                    let error = GuardianError::Timeout {
                        path: path.clone(),
                        timeout_ms: u64::try_from(context.timeout.as_millis()).unwrap_or(u64::MAX),
                    };
                    Step::Failed(FailureKind::Timeout, error.to_string())
                }
            };

            if matches!(step, Step::Failed(..)) && context.stop_on_error {
                context.cancelled.store(true, Ordering::SeqCst);
            }
            let _ = sender.send((index, path, step));
        });
    }
}
