//! VoiceJury analysis orchestration engine
//!
//! The two pipelines (reference preparation and performance analysis),
//! the scoring algorithms they share, and the named job queues that pin
//! heavy work to the worker with the right GPU.

pub mod analysis;
pub mod audio;
pub mod envelope;
pub mod queue;
pub mod reference;
pub mod scoring;
pub mod sync;

pub use analysis::{AnalysisConfig, AnalysisPipeline};
pub use envelope::{FlowEnvelope, compute_flow_envelope};
pub use queue::{
    JobRunner, ProgressSink, QUEUE_DEFAULT, QUEUE_GPU, QUEUE_GPU_HEAVY, TASK_TIME_LIMIT, TaskState,
};
pub use reference::{ReferenceArtifacts, ReferencePipeline, ReferenceSource};
pub use sync::{MIN_OFFSET_CONFIDENCE, compute_sync_offset, effective_offset};
