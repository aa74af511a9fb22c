//! Orchestrator: drives a batch from discovery to completion.
//!
//! Owns the submit-on-demand queue: instead of creating every task up front,
//! at most `prefetch_factor * current_level` worker tasks are outstanding at
//! any time, topped up as completions free capacity. Submission follows
//! discovery order; completions may arrive in any order. Operator commands
//! (level changes, refresh, shutdown) arrive on a channel and each maps to a
//! single controller or queue operation.

use crate::concurrency::{derive_initial_level, ConcurrencyController};
use crate::decide::{DecisionEngine, DecisionError, DecisionInput, Verdict};
use crate::events::{Event, EventBus, EventPayload};
use crate::executor::{CompressRequest, ExecOutcome, JobRunner};
use crate::housekeeping;
use crate::jobs::{Job, JobStatus, HW_CAP_RETRY_DELAY, MAX_HW_CAP_RETRIES};
use crate::markers;
use crate::probe::{Metadata, MetadataProvider};
use crate::scan::{self, ScanError, SourceFile};
use crate::stats::{RunStats, StatsSnapshot};
use crate::tags;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use vidbatch_config::RunConfig;

/// Error type for orchestrator runs.
///
/// Only discovery and configuration problems abort a run; per-file failures
/// are converted to terminal job states and events at the worker boundary.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Input root unreadable or missing.
    #[error(transparent)]
    Discovery(#[from] ScanError),

    /// Configuration could not be compiled into a decision engine.
    #[error(transparent)]
    Decision(#[from] DecisionError),
}

/// Discrete operator commands; each maps to one controller/queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Raise the concurrency level by one.
    RaiseConcurrency,
    /// Lower the concurrency level by one (lazy contraction).
    LowerConcurrency,
    /// Stop admitting new jobs; running jobs finish normally.
    Shutdown,
    /// Re-run discovery and merge newly found files into the pending queue.
    Refresh,
    /// Stop admitting and return without waiting for running jobs.
    Interrupt,
}

/// Final result of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub elapsed: Duration,
}

impl From<StatsSnapshot> for RunSummary {
    fn from(snap: StatsSnapshot) -> Self {
        Self {
            completed: snap.completed,
            failed: snap.failed,
            skipped: snap.skipped,
            input_bytes: snap.input_bytes,
            output_bytes: snap.output_bytes,
            elapsed: snap.elapsed,
        }
    }
}

/// How a worker's file ended up; fed back into the stats aggregate.
#[derive(Debug)]
enum CompletionKind {
    Completed { input_bytes: u64, output_bytes: u64 },
    Failed,
    Skipped,
}

#[derive(Debug)]
struct WorkerDone {
    path: PathBuf,
    kind: CompletionKind,
}

/// Shared immutable state handed to every worker task.
struct WorkerContext {
    bus: Arc<EventBus>,
    provider: Arc<MetadataProvider>,
    engine: DecisionEngine,
    controller: Arc<ConcurrencyController>,
    runner: Arc<dyn JobRunner>,
    output_root: PathBuf,
    use_gpu: bool,
    copy_metadata: bool,
    timeout: Duration,
}

/// Drives discovery, submission, job lifecycle, and completion bookkeeping
/// for one batch run.
pub struct Orchestrator {
    ctx: Arc<WorkerContext>,
    input_root: PathBuf,
    extensions: Vec<String>,
    prefetch_factor: u32,
    retry_failed: bool,
    stats: Arc<RunStats>,
}

impl Orchestrator {
    /// Build an orchestrator for one input root.
    ///
    /// Compiles the decision engine (invalid rotation patterns are fatal
    /// here) and derives the initial concurrency level.
    pub fn new(
        config: RunConfig,
        input_root: PathBuf,
        bus: Arc<EventBus>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self, OrchestratorError> {
        let engine = DecisionEngine::from_config(&config)?;
        let level = derive_initial_level(config.concurrency.initial, config.concurrency.max);
        let controller = Arc::new(ConcurrencyController::new(level, config.concurrency.max));
        let output_root = scan::output_root_for(&input_root);

        let ctx = Arc::new(WorkerContext {
            bus,
            provider: Arc::new(MetadataProvider::new()),
            engine,
            controller,
            runner,
            output_root,
            use_gpu: config.execution.use_gpu,
            copy_metadata: config.execution.copy_metadata,
            timeout: Duration::from_secs(config.execution.timeout_secs),
        });

        Ok(Self {
            ctx,
            input_root,
            extensions: config.filters.extensions.clone(),
            prefetch_factor: config.concurrency.prefetch_factor,
            retry_failed: config.execution.retry_failed,
            stats: Arc::new(RunStats::new()),
        })
    }

    /// The admission gate, shared with operator surfaces.
    pub fn controller(&self) -> Arc<ConcurrencyController> {
        self.ctx.controller.clone()
    }

    /// The run's statistics aggregate, shared with display surfaces.
    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    /// The metadata cache, shared so display refreshes never re-probe.
    pub fn metadata_provider(&self) -> Arc<MetadataProvider> {
        self.ctx.provider.clone()
    }

    /// Resolved output root (input root plus suffix).
    pub fn output_root(&self) -> &Path {
        &self.ctx.output_root
    }

    /// Run the batch to completion, reacting to operator commands.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<OperatorCommand>,
    ) -> Result<RunSummary, OrchestratorError> {
        let cleanup = housekeeping::clean_output_tree(&self.ctx.output_root, self.retry_failed);
        if cleanup.tmp_removed > 0 || cleanup.markers_removed > 0 {
            info!(
                tmp_removed = cleanup.tmp_removed,
                markers_removed = cleanup.markers_removed,
                "cleaned stale artifacts from output tree"
            );
        }

        self.ctx
            .bus
            .publish(&Event::new(EventPayload::DiscoveryStarted {
                root: self.input_root.clone(),
            }));
        let candidates = scan::scan_input(&self.input_root, &self.ctx.output_root, &self.extensions)?;
        self.ctx
            .bus
            .publish(&Event::new(EventPayload::DiscoveryFinished {
                files_found: candidates.len(),
            }));
        info!(files = candidates.len(), "discovery finished");

        let mut pending: VecDeque<SourceFile> = candidates.into();
        let mut in_flight: HashSet<PathBuf> = HashSet::new();
        let mut finished: HashSet<PathBuf> = HashSet::new();
        let (done_tx, mut done_rx) = mpsc::channel::<WorkerDone>(64);
        let mut commands_open = true;
        let mut interrupted = false;

        loop {
            self.top_up(&mut pending, &mut in_flight, &done_tx);

            if in_flight.is_empty()
                && (pending.is_empty() || self.ctx.controller.is_shutdown())
            {
                break;
            }
            if interrupted {
                break;
            }

            tokio::select! {
                Some(done) = done_rx.recv() => {
                    in_flight.remove(&done.path);
                    finished.insert(done.path);
                    match done.kind {
                        CompletionKind::Completed { input_bytes, output_bytes } => {
                            self.stats.record_completed(input_bytes, output_bytes);
                        }
                        CompletionKind::Failed => self.stats.record_failed(),
                        CompletionKind::Skipped => self.stats.record_skipped(),
                    }
                }
                cmd = commands.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => self.handle_command(
                            cmd,
                            &mut pending,
                            &in_flight,
                            &finished,
                            &mut interrupted,
                        ),
                        None => commands_open = false,
                    }
                }
            }
        }

        let snapshot = self.stats.snapshot();
        self.ctx.bus.publish(&Event::new(EventPayload::RunFinished {
            completed: snapshot.completed,
            failed: snapshot.failed,
            skipped: snapshot.skipped,
        }));
        info!(
            completed = snapshot.completed,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            "run finished"
        );

        Ok(snapshot.into())
    }

    /// Submit pending files until the outstanding count reaches
    /// `prefetch_factor * current_level`. No-op after shutdown.
    fn top_up(
        &self,
        pending: &mut VecDeque<SourceFile>,
        in_flight: &mut HashSet<PathBuf>,
        done_tx: &mpsc::Sender<WorkerDone>,
    ) {
        if self.ctx.controller.is_shutdown() {
            return;
        }
        let max_inflight =
            self.prefetch_factor as usize * self.ctx.controller.level() as usize;
        while in_flight.len() < max_inflight {
            let Some(source) = pending.pop_front() else {
                break;
            };
            in_flight.insert(source.path.clone());
            let ctx = self.ctx.clone();
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let done = process_file(ctx, source).await;
                let _ = done_tx.send(done).await;
            });
        }
    }

    fn handle_command(
        &self,
        cmd: OperatorCommand,
        pending: &mut VecDeque<SourceFile>,
        in_flight: &HashSet<PathBuf>,
        finished: &HashSet<PathBuf>,
        interrupted: &mut bool,
    ) {
        match cmd {
            OperatorCommand::RaiseConcurrency => {
                if self.ctx.controller.increase() {
                    let level = self.ctx.controller.level();
                    info!(level, "concurrency raised");
                    self.ctx.bus.publish(&Event::new(
                        EventPayload::ConcurrencyLevelChanged { level },
                    ));
                }
            }
            OperatorCommand::LowerConcurrency => {
                if self.ctx.controller.decrease() {
                    let level = self.ctx.controller.level();
                    info!(level, "concurrency lowered");
                    self.ctx.bus.publish(&Event::new(
                        EventPayload::ConcurrencyLevelChanged { level },
                    ));
                }
            }
            OperatorCommand::Shutdown => {
                if !self.ctx.controller.is_shutdown() {
                    info!("graceful shutdown requested, finishing running jobs");
                    self.ctx.controller.shutdown();
                    pending.clear();
                    self.ctx
                        .bus
                        .publish(&Event::new(EventPayload::ShutdownRequested));
                }
            }
            OperatorCommand::Refresh => {
                // Shutdown wins: a refresh after shutdown is a no-op.
                if self.ctx.controller.is_shutdown() {
                    return;
                }
                match scan::scan_input(&self.input_root, &self.ctx.output_root, &self.extensions)
                {
                    Ok(found) => {
                        let known: HashSet<PathBuf> =
                            pending.iter().map(|s| s.path.clone()).collect();
                        let mut added = 0usize;
                        for source in found {
                            if known.contains(&source.path)
                                || in_flight.contains(&source.path)
                                || finished.contains(&source.path)
                            {
                                continue;
                            }
                            pending.push_back(source);
                            added += 1;
                        }
                        info!(added, "refresh merged new files into queue");
                    }
                    Err(e) => warn!(error = %e, "refresh scan failed"),
                }
            }
            OperatorCommand::Interrupt => {
                info!("interrupt requested, not waiting for running jobs");
                if !self.ctx.controller.is_shutdown() {
                    self.ctx.controller.shutdown();
                    self.ctx
                        .bus
                        .publish(&Event::new(EventPayload::ShutdownRequested));
                }
                pending.clear();
                *interrupted = true;
            }
        }
    }
}

/// Full per-file pipeline: probe, decide, admit, encode, bookkeep.
async fn process_file(ctx: Arc<WorkerContext>, source: SourceFile) -> WorkerDone {
    let path = source.path.clone();
    let output_path = scan::output_path_for(&ctx.output_root, &source);
    let mut job = Job::new(source, output_path);

    let kind = run_job(&ctx, &mut job).await;
    WorkerDone { path, kind }
}

async fn run_job(ctx: &WorkerContext, job: &mut Job) -> CompletionKind {
    // Already-finished outputs make a re-run idempotent.
    if job.output_path.exists() {
        return skip_job(ctx, job, "output already exists".to_string());
    }

    let metadata = match ctx.provider.extract(&job.source.path).await {
        Ok(metadata) => metadata,
        Err(e) if e.is_tool_unavailable() => {
            // Tool environment problem, not this file's fault: skip, count,
            // never fatal, no marker.
            return skip_job(ctx, job, format!("metadata extraction failed: {}", e));
        }
        Err(e) => {
            // The probe ran and rejected the input: corrupted file, failed
            // before any concurrency slot is consumed.
            let reason = format!("corrupted input: {}", e);
            if let Err(marker_err) = markers::write_marker(&job.output_path, &reason) {
                warn!(error = %marker_err, "failed to write error marker");
            }
            return fail_job(ctx, job, reason);
        }
    };

    job.set_status(JobStatus::MetadataReady);

    let file_name = job.file_name();
    let verdict = ctx.engine.decide(&DecisionInput {
        metadata: metadata.as_ref(),
        size_bytes: job.source.size_bytes,
        file_name: &file_name,
        has_error_marker: markers::has_marker(&job.output_path),
    });
    match verdict {
        Verdict::Skip(reason) => return skip_job(ctx, job, reason.to_string()),
        Verdict::Proceed { quality, rotation } => {
            job.quality = quality;
            job.rotation = rotation;
        }
    }

    if !ctx.controller.acquire().await {
        return skip_job(ctx, job, "shutdown requested".to_string());
    }

    job.set_status(JobStatus::Admitted);
    ctx.bus.publish(&Event::new(EventPayload::JobAdmitted {
        job_id: job.id.clone(),
        path: job.source.path.clone(),
    }));

    let kind = encode_job(ctx, job, metadata.as_ref()).await;
    ctx.controller.release();
    kind
}

/// Encode while holding a concurrency slot, with hardware-capability backoff.
async fn encode_job(ctx: &WorkerContext, job: &mut Job, metadata: &Metadata) -> CompletionKind {
    if let Some(parent) = job.output_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let reason = format!("failed to create output directory: {}", e);
            let _ = markers::write_marker(&job.output_path, &reason);
            return fail_job(ctx, job, reason);
        }
    }

    let tmp = markers::tmp_path(&job.output_path);
    let request = CompressRequest {
        input_path: job.source.path.clone(),
        tmp_path: tmp.clone(),
        quality: job.quality,
        rotation: job.rotation,
        use_gpu: ctx.use_gpu,
        copy_metadata: ctx.copy_metadata,
        duration_secs: metadata.duration_secs,
        timeout: ctx.timeout,
    };

    job.set_status(JobStatus::Running);
    ctx.bus.publish(&Event::new(EventPayload::JobStarted {
        job_id: job.id.clone(),
        path: job.source.path.clone(),
    }));

    let mut attempt = 0u32;
    loop {
        match ctx.runner.run(&job.id, &request).await {
            ExecOutcome::Success => {
                let output_bytes = match tokio::fs::metadata(&tmp).await {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        let reason = format!("encoder output missing: {}", e);
                        let _ = markers::write_marker(&job.output_path, &reason);
                        return fail_job(ctx, job, reason);
                    }
                };

                // Rename onto the final path only now; an interrupted run
                // never presents a truncated file as finished.
                if let Err(e) = tokio::fs::rename(&tmp, &job.output_path).await {
                    let reason = format!("failed to move output into place: {}", e);
                    let _ = tokio::fs::remove_file(&tmp).await;
                    let _ = markers::write_marker(&job.output_path, &reason);
                    return fail_job(ctx, job, reason);
                }

                if let Err(e) = markers::clear_marker(&job.output_path) {
                    warn!(error = %e, "failed to clear stale error marker");
                }

                if ctx.copy_metadata {
                    if let Err(e) = tags::copy_tags(&job.source.path, &job.output_path).await {
                        warn!(
                            path = %job.source.path.display(),
                            error = %e,
                            "tag copy failed, output kept without tags"
                        );
                    }
                }

                job.set_status(JobStatus::Completed);
                let input_bytes = job.source.size_bytes;
                ctx.bus.publish(&Event::new(EventPayload::JobCompleted {
                    job_id: job.id.clone(),
                    path: job.source.path.clone(),
                    input_bytes,
                    output_bytes,
                }));
                return CompletionKind::Completed {
                    input_bytes,
                    output_bytes,
                };
            }
            ExecOutcome::HwCapLimit(reason) => {
                job.set_status(JobStatus::HwCapLimit);
                let level = ctx.controller.halve_level();
                ctx.bus
                    .publish(&Event::new(EventPayload::HardwareCapabilityLimited {
                        job_id: job.id.clone(),
                        attempt,
                    }));
                ctx.bus.publish(&Event::new(
                    EventPayload::ConcurrencyLevelChanged { level },
                ));
                let _ = tokio::fs::remove_file(&tmp).await;

                if attempt < MAX_HW_CAP_RETRIES {
                    attempt += 1;
                    warn!(
                        path = %job.source.path.display(),
                        attempt,
                        level,
                        "hardware rejected a session, backing off before retry"
                    );
                    tokio::time::sleep(HW_CAP_RETRY_DELAY).await;
                    job.set_status(JobStatus::Running);
                    continue;
                }

                let reason = format!(
                    "hardware capability limit persisted after {} retries: {}",
                    MAX_HW_CAP_RETRIES, reason
                );
                let _ = markers::write_marker(&job.output_path, &reason);
                return fail_job(ctx, job, reason);
            }
            ExecOutcome::Failed(reason) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                if let Err(e) = markers::write_marker(&job.output_path, &reason) {
                    warn!(error = %e, "failed to write error marker");
                }
                return fail_job(ctx, job, reason);
            }
            ExecOutcome::Timeout => {
                let reason = format!("compression timeout ({}s)", ctx.timeout.as_secs());
                let _ = tokio::fs::remove_file(&tmp).await;
                if let Err(e) = markers::write_marker(&job.output_path, &reason) {
                    warn!(error = %e, "failed to write error marker");
                }
                return fail_job(ctx, job, reason);
            }
        }
    }
}

fn skip_job(ctx: &WorkerContext, job: &mut Job, reason: String) -> CompletionKind {
    job.skip(reason.clone());
    ctx.bus.publish(&Event::new(EventPayload::JobSkipped {
        job_id: job.id.clone(),
        path: job.source.path.clone(),
        reason,
    }));
    CompletionKind::Skipped
}

fn fail_job(ctx: &WorkerContext, job: &mut Job, reason: String) -> CompletionKind {
    job.fail(reason.clone());
    ctx.bus.publish(&Event::new(EventPayload::JobFailed {
        job_id: job.id.clone(),
        path: job.source.path.clone(),
        reason,
    }));
    CompletionKind::Failed
}
