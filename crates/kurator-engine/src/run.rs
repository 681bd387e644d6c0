//! Pipeline run lifecycle.
//!
//! A run wires one worker task per stage with bounded channels, one source
//! task feeding the chain head, and a supervisor that waits for the workers,
//! persists the run row, and hands the summary to [`PipelineRun::await_completion`].
//!
//! Every admitted record holds a permit from the admission semaphore until it
//! terminates, so the number of records in flight never exceeds
//! `queue_depth + stages`. The ledger is updated before the permit is
//! released. The run finalizes once, when the source has finished and no
//! record is in flight.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use kurator_sink::SummarySink;
use kurator_types::{
    CurationStatus, Provenance, ProvenanceEntry, Record, RecordId, RunId, RunStats, RunStatus,
    StageError, StageKind,
};
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::chain::StageChain;
use crate::config::{PipelineSettings, RunConfig};
use crate::errors::PipelineError;
use crate::result::{Disposition, FailureReason, RecordTrail, RunSummary};
use crate::source::RecordSource;
use crate::stage::{Stage, StageOutcome};

/// Scheduling and failure policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    /// Per-edge channel capacity.
    pub queue_depth: usize,
    pub max_consecutive_stage_failures: Option<u32>,
    pub max_sink_failures: Option<u32>,
}

impl RunPolicy {
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
            max_consecutive_stage_failures: None,
            max_sink_failures: None,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_consecutive_stage_failures: settings.max_consecutive_stage_failures,
            max_sink_failures: settings.max_sink_failures,
            ..Self::new(settings.queue_depth)
        }
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

/// A record travelling between stages, with its admission permit.
struct Envelope {
    record: Record,
    provenance: Provenance,
    permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct Ledger {
    stats: RunStats,
    source_done: bool,
    finalized: bool,
    /// Unbroken run of collaborator errors, per stage.
    consecutive_stage_errors: HashMap<StageKind, u32>,
    failure: Option<FailureReason>,
    peak_in_flight: u64,
    trails: Vec<RecordTrail>,
}

impl Ledger {
    /// Returns the terminal status if this call is the one that finalizes.
    fn try_finalize(&mut self) -> Option<RunStatus> {
        if self.finalized || !self.source_done || self.stats.in_flight() > 0 {
            return None;
        }
        self.finalized = true;
        if let Some(reason) = &self.failure {
            self.stats.error_message = Some(reason.to_string());
            Some(RunStatus::Failed)
        } else {
            Some(RunStatus::Completed)
        }
    }
}

struct RunShared {
    run_id: RunId,
    policy: RunPolicy,
    ledger: Mutex<Ledger>,
    stop: watch::Sender<bool>,
    status: watch::Sender<RunStatus>,
    admission: Arc<Semaphore>,
}

impl RunShared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn latch(&self, next: RunStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Record a failure reason (first one wins) and stop admission.
    fn trip(&self, ledger: &mut Ledger, reason: FailureReason) {
        if ledger.finalized {
            return;
        }
        if ledger.failure.is_none() {
            match &reason {
                FailureReason::Cancelled(_) => {
                    tracing::warn!(run_id = %self.run_id, "Run cancelled: {}", reason);
                }
                _ => tracing::error!(run_id = %self.run_id, "Run failing: {}", reason),
            }
            ledger.failure = Some(reason);
        }
        self.stop.send_replace(true);
    }

    fn admit(&self) {
        let mut ledger = self.ledger();
        ledger.stats.admitted += 1;
        let in_flight = ledger.stats.in_flight();
        ledger.peak_in_flight = ledger.peak_in_flight.max(in_flight);
    }

    /// `stage` decided a record without a collaborator error.
    fn progressed(&self, stage: StageKind) {
        if let Some(count) = self.ledger().consecutive_stage_errors.get_mut(&stage) {
            *count = 0;
        }
    }

    fn terminate(
        &self,
        record_id: RecordId,
        disposition: Disposition,
        provenance: Provenance,
        error: Option<&StageError>,
    ) {
        let finalized = {
            let mut ledger = self.ledger();
            match disposition {
                Disposition::Passed => ledger.stats.passed += 1,
                Disposition::Dropped => ledger.stats.dropped += 1,
                Disposition::Failed => ledger.stats.failed += 1,
            }
            match error {
                Some(e) if e.stage == StageKind::Sink => {
                    ledger.stats.sink_errors += 1;
                    if let Some(max) = self.policy.max_sink_failures {
                        if ledger.stats.sink_errors >= u64::from(max) {
                            self.trip(&mut ledger, FailureReason::SinkFailureThreshold(max));
                        }
                    }
                }
                Some(e) => {
                    ledger.stats.stage_errors += 1;
                    let count = ledger.consecutive_stage_errors.entry(e.stage).or_insert(0);
                    *count += 1;
                    let count = *count;
                    if let Some(max) = self.policy.max_consecutive_stage_failures {
                        if count >= max {
                            self.trip(&mut ledger, FailureReason::StageFailureThreshold(max));
                        }
                    }
                }
                None => {}
            }
            if disposition != Disposition::Passed {
                ledger.trails.push(RecordTrail {
                    record_id,
                    disposition,
                    provenance,
                });
            }
            ledger.try_finalize()
        };
        if let Some(status) = finalized {
            self.latch(status);
        }
    }

    fn source_finished(&self) {
        let finalized = {
            let mut ledger = self.ledger();
            ledger.source_done = true;
            ledger.try_finalize()
        };
        if let Some(status) = finalized {
            self.latch(status);
        }
    }

    fn fail(&self, reason: FailureReason) {
        let mut ledger = self.ledger();
        self.trip(&mut ledger, reason);
    }

    fn summary(&self, elapsed: Duration) -> RunSummary {
        let ledger = self.ledger();
        RunSummary {
            run_id: self.run_id.clone(),
            status: *self.status.borrow(),
            stats: ledger.stats.clone(),
            failure: ledger.failure.clone(),
            elapsed,
            peak_in_flight: ledger.peak_in_flight,
            trails: ledger.trails.clone(),
        }
    }
}

/// Handle that cancels a run from outside.
#[derive(Clone)]
pub struct RunCanceller {
    shared: Arc<RunShared>,
}

impl RunCanceller {
    /// Stop admitting records; in-flight records drain and the run ends
    /// `Failed`. No effect once the run has finalized.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.shared.fail(FailureReason::Cancelled(reason.into()));
    }
}

struct Pending {
    chain: StageChain,
    source: Box<dyn RecordSource>,
}

/// One isolated execution of a stage chain against one source.
pub struct PipelineRun {
    shared: Arc<RunShared>,
    config: Arc<RunConfig>,
    pending: Option<Pending>,
    summary_rx: Option<oneshot::Receiver<RunSummary>>,
}

impl PipelineRun {
    #[must_use]
    pub fn new(
        run_id: RunId,
        config: Arc<RunConfig>,
        chain: StageChain,
        source: Box<dyn RecordSource>,
        policy: RunPolicy,
    ) -> Self {
        let window = policy.queue_depth + chain.len();
        let (stop, _) = watch::channel(false);
        let (status, _) = watch::channel(RunStatus::Created);
        tracing::info!(
            run_id = %run_id,
            authority = %config.authority,
            limit = config.limit,
            source = source.name(),
            stages = chain.len(),
            window,
            "Run created"
        );
        Self {
            shared: Arc::new(RunShared {
                run_id,
                policy,
                ledger: Mutex::new(Ledger::default()),
                stop,
                status,
                admission: Arc::new(Semaphore::new(window)),
            }),
            config,
            pending: Some(Pending { chain, source }),
            summary_rx: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &RunId {
        &self.shared.run_id
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        *self.shared.status.borrow()
    }

    /// Observe status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<RunStatus> {
        self.shared.status.subscribe()
    }

    #[must_use]
    pub fn canceller(&self) -> RunCanceller {
        RunCanceller {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        self.canceller().cancel(reason);
    }

    /// Register the run with the sink and begin admitting records.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ChainConstruction`] if the sink refuses the
    /// run registration; the run is then `Failed` without admitting anything.
    /// Returns [`PipelineError::Infrastructure`] if the run was already started.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        let Some(Pending { chain, source }) = self.pending.take() else {
            return Err(anyhow::anyhow!("run {} already started", self.id()).into());
        };
        let started = Instant::now();
        let (stages, sink) = chain.into_parts();

        let params = serde_json::to_value(&*self.config)
            .map_err(|e| PipelineError::Infrastructure(e.into()))?;
        let registered = {
            let sink = Arc::clone(&sink);
            let run_id = self.shared.run_id.clone();
            tokio::task::spawn_blocking(move || sink.start_run(&run_id, &params))
                .await
                .map_err(|e| anyhow::anyhow!("run registration task failed: {e}"))?
        };
        if let Err(e) = registered {
            self.shared.latch(RunStatus::Failed);
            return Err(PipelineError::ChainConstruction(format!(
                "sink refused run registration: {e}"
            )));
        }

        self.shared.latch(RunStatus::Running);
        tracing::info!(run_id = %self.shared.run_id, "Run started");

        let depth = self.shared.policy.queue_depth;
        let (head_tx, mut rx) = mpsc::channel::<Envelope>(depth);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(stages.len() + 1);
        let last = stages.len() - 1;
        for (index, stage) in stages.into_iter().enumerate() {
            let (next_tx, next_rx) = if index < last {
                let (tx, rx) = mpsc::channel::<Envelope>(depth);
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
            handles.push(tokio::spawn(run_stage(
                Arc::clone(&self.shared),
                stage,
                rx,
                next_tx,
            )));
            if let Some(next_rx) = next_rx {
                rx = next_rx;
            } else {
                break;
            }
        }
        handles.push(tokio::spawn(run_source(
            Arc::clone(&self.shared),
            source,
            head_tx,
            self.config.limit,
        )));

        let (summary_tx, summary_rx) = oneshot::channel();
        tokio::spawn(supervise(
            Arc::clone(&self.shared),
            handles,
            sink,
            started,
            summary_tx,
        ));
        self.summary_rx = Some(summary_rx);
        Ok(())
    }

    /// Wait until the run reaches `Completed` or `Failed` and return its
    /// summary. A `Failed` run still yields `Ok`; inspect the summary status.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Infrastructure`] if the run was never started
    /// or its supervisor task died.
    pub async fn await_completion(mut self) -> Result<RunSummary, PipelineError> {
        let Some(rx) = self.summary_rx.take() else {
            return Err(anyhow::anyhow!("run {} was never started", self.id()).into());
        };
        rx.await.map_err(|_| {
            PipelineError::Infrastructure(anyhow::anyhow!(
                "run {} supervisor exited without a summary",
                self.shared.run_id
            ))
        })
    }
}

async fn run_source(
    shared: Arc<RunShared>,
    mut source: Box<dyn RecordSource>,
    head: mpsc::Sender<Envelope>,
    limit: u64,
) {
    let mut stop = shared.stop.subscribe();
    let mut seen: HashSet<RecordId> = HashSet::new();
    let mut admitted = 0u64;

    while admitted < limit {
        let permit = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            permit = Arc::clone(&shared.admission).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let next = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            next = source.next_record() => next,
        };
        match next {
            Ok(Some(record)) => {
                if !seen.insert(record.id().clone()) {
                    tracing::warn!(
                        run_id = %shared.run_id,
                        record = %record.id(),
                        "Duplicate record identity from source, skipping"
                    );
                    continue;
                }
                shared.admit();
                admitted += 1;
                let envelope = Envelope {
                    record,
                    provenance: Provenance::new(),
                    permit,
                };
                if let Err(mpsc::error::SendError(lost)) = head.send(envelope).await {
                    fail_unsent(&shared, lost, "chain head closed");
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(run_id = %shared.run_id, admitted, "Source exhausted");
                break;
            }
            Err(e) => {
                shared.fail(FailureReason::SourceFailed(e.to_string()));
                break;
            }
        }
    }
    if admitted >= limit {
        tracing::info!(run_id = %shared.run_id, limit, "Record limit reached");
    }

    source.close().await;
    drop(head);
    shared.source_finished();
}

async fn run_stage(
    shared: Arc<RunShared>,
    stage: Arc<dyn Stage>,
    mut rx: mpsc::Receiver<Envelope>,
    next: Option<mpsc::Sender<Envelope>>,
) {
    while let Some(Envelope {
        record,
        provenance,
        permit,
    }) = rx.recv().await
    {
        let record_id = record.id().clone();
        let outcome = match AssertUnwindSafe(stage.process(record, provenance.clone()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let error = StageError::internal(
                    stage.kind(),
                    format!("stage panicked: {}", panic_message(&*panic)),
                );
                tracing::error!(
                    run_id = %shared.run_id,
                    stage = %stage.kind(),
                    record = %record_id,
                    "{error}"
                );
                let provenance = provenance.with(ProvenanceEntry::new(
                    stage.kind(),
                    stage.actor(),
                    CurationStatus::Fail,
                    error.to_string(),
                ));
                StageOutcome::Fail {
                    provenance,
                    error: Some(error),
                }
            }
        };

        if !matches!(outcome, StageOutcome::Fail { error: Some(_), .. }) {
            shared.progressed(stage.kind());
        }
        match outcome {
            StageOutcome::Forward(record, provenance) => match &next {
                Some(tx) => {
                    let envelope = Envelope {
                        record,
                        provenance,
                        permit,
                    };
                    if let Err(mpsc::error::SendError(lost)) = tx.send(envelope).await {
                        fail_unsent(&shared, lost, "downstream stage closed");
                    }
                }
                None => {
                    shared.terminate(record_id, Disposition::Passed, provenance, None);
                    drop(permit);
                }
            },
            StageOutcome::Drop(provenance) => {
                shared.terminate(record_id, Disposition::Dropped, provenance, None);
                drop(permit);
            }
            StageOutcome::Fail { provenance, error } => {
                shared.terminate(record_id, Disposition::Failed, provenance, error.as_ref());
                drop(permit);
            }
        }
    }
}

/// Terminate a record that could not be handed to the next stage.
fn fail_unsent(shared: &RunShared, envelope: Envelope, why: &str) {
    let Envelope {
        record,
        provenance,
        permit,
    } = envelope;
    tracing::error!(run_id = %shared.run_id, record = %record.id(), "{why}");
    shared.terminate(record.id().clone(), Disposition::Failed, provenance, None);
    drop(permit);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

async fn supervise(
    shared: Arc<RunShared>,
    handles: Vec<JoinHandle<()>>,
    sink: Arc<dyn SummarySink>,
    started: Instant,
    summary_tx: oneshot::Sender<RunSummary>,
) {
    for joined in futures::future::join_all(handles).await {
        if let Err(e) = joined {
            tracing::error!(run_id = %shared.run_id, "Run task failed: {e}");
        }
    }

    // Every task has exited; anything still counted in flight is lost.
    let forced = {
        let mut ledger = shared.ledger();
        if ledger.finalized {
            None
        } else {
            let lost = ledger.stats.in_flight();
            ledger.source_done = true;
            ledger.finalized = true;
            let reason = ledger
                .failure
                .get_or_insert(FailureReason::RecordsLost(lost))
                .to_string();
            ledger.stats.error_message = Some(reason);
            Some(RunStatus::Failed)
        }
    };
    if let Some(status) = forced {
        shared.latch(status);
    }

    let summary = shared.summary(started.elapsed());
    let persisted = {
        let sink = Arc::clone(&sink);
        let run_id = summary.run_id.clone();
        let status = summary.status;
        let stats = summary.stats.clone();
        let elapsed_ms = summary.elapsed_ms();
        tokio::task::spawn_blocking(move || sink.complete_run(&run_id, status, &stats, elapsed_ms))
            .await
    };
    match persisted {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(run_id = %summary.run_id, "Failed to persist run: {e}"),
        Err(e) => tracing::error!(run_id = %summary.run_id, "Run persistence task failed: {e}"),
    }

    if summary.is_completed() {
        tracing::info!(
            run_id = %summary.run_id,
            admitted = summary.stats.admitted,
            passed = summary.stats.passed,
            dropped = summary.stats.dropped,
            failed = summary.stats.failed,
            runtime_ms = summary.elapsed_ms(),
            "Run completed"
        );
    } else {
        tracing::error!(
            run_id = %summary.run_id,
            admitted = summary.stats.admitted,
            passed = summary.stats.passed,
            dropped = summary.stats.dropped,
            failed = summary.stats.failed,
            runtime_ms = summary.elapsed_ms(),
            reason = %summary.failure_message(),
            "Run failed"
        );
    }

    // Receiver may be gone if the caller stopped waiting.
    let _ = summary_tx.send(summary);
}
