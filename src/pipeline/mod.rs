//! Per-utterance pipeline: the orchestrator and the streamed synthesis receiver.

mod orchestrator;
mod stream;

pub use orchestrator::{Orchestrator, PipelineEvent, PipelineOutcome, RetryPolicy};
pub use stream::{StreamReport, StreamSettings, receive_stream};
