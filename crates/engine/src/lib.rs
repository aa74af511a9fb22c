//! vidbatch engine
//!
//! Batch video compression orchestrator: discovers candidate files, probes
//! their metadata, decides per-file encoding parameters, and runs the external
//! encoder under a dynamically adjustable concurrency gate.

pub mod concurrency;
pub mod decide;
pub mod events;
pub mod executor;
pub mod housekeeping;
pub mod jobs;
pub mod markers;
pub mod orchestrator;
pub mod probe;
pub mod scan;
pub mod stats;
pub mod tags;

pub use concurrency::ConcurrencyController;
pub use decide::{DecisionEngine, DecisionError, DecisionInput, SkipReason, Verdict};
pub use events::{Event, EventBus, EventKind, EventPayload};
pub use executor::{
    build_ffmpeg_command, CompressRequest, ExecOutcome, FfmpegRunner, JobRunner,
};
pub use jobs::{Job, JobStatus};
pub use orchestrator::{
    OperatorCommand, Orchestrator, OrchestratorError, RunSummary,
};
pub use probe::{Metadata, MetadataProvider, ProbeError};
pub use scan::{output_root_for, scan_input, ScanError, SourceFile};
pub use stats::{RunStats, StatsSnapshot};
pub use vidbatch_config as config;
pub use vidbatch_config::RunConfig;
