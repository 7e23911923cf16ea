//! Voice assistant core: captured speech goes to a recognition backend, the
//! transcript to a language model, and the reply to a text-to-speech backend
//! whose streamed response is decoded and played as it arrives.

pub mod accumulator;
pub mod agent;
pub mod audio;
pub mod backend;
pub mod capture_bridge;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod frame_decoder;
pub mod frame_scanner;
pub mod pipeline;
pub mod status_bridge;

pub use error::{PipelineError, Result, Stage};
