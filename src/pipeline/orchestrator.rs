use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::stream::{StreamReport, StreamSettings, receive_stream};
use crate::audio::AudioSink;
use crate::backend::{
    BaiduRecognizer, ChatGenerator, MiniMaxGenerator, MiniMaxSynthesizer, SpeechRecognizer,
    SpeechSynthesizer,
};
use crate::config::{Config, NetworkConfig};
use crate::error::{PipelineError, Result, Stage};

/// Progress notifications for whoever drives the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted(Stage),
    Recognized(String),
    Generated(String),
    SynthesisFinished(StreamReport),
}

/// Bounded exponential backoff, applied to network failures only.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub recognized: String,
    pub reply: String,
    pub report: StreamReport,
}

/// Runs recognize → generate → synthesize for one utterance at a time.
///
/// Holds no per-utterance state: buffers live inside the stage that uses
/// them and are gone before the next stage starts.
pub struct Orchestrator {
    recognizer: Arc<dyn SpeechRecognizer>,
    generator: Arc<dyn ChatGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    stream: StreamSettings,
    retry: RetryPolicy,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl Orchestrator {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        generator: Arc<dyn ChatGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        stream: StreamSettings,
    ) -> Self {
        Self {
            recognizer,
            generator,
            synthesizer,
            stream,
            retry: RetryPolicy::none(),
            events: None,
        }
    }

    /// Wire up the Baidu and MiniMax HTTP backends.
    pub fn from_config(config: &Config) -> Result<Self> {
        let recognizer = BaiduRecognizer::new(&config.recognition, &config.capture, &config.device.cuid)?;
        let generator = MiniMaxGenerator::new(&config.generation, &config.device.sender_name)?;
        let synthesizer = MiniMaxSynthesizer::new(&config.synthesis)?;
        let stream = StreamSettings {
            capacity: config.synthesis.response_buffer_size,
            channel_depth: config.synthesis.channel_depth,
            idle_timeout: config.synthesis.idle_timeout(),
        };

        Ok(Self::new(Arc::new(recognizer), Arc::new(generator), Arc::new(synthesizer), stream)
            .with_retry(RetryPolicy::from_config(&config.network)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run the whole pipeline for one captured utterance.
    ///
    /// Any stage failure ends the run; the sink is left idle either way.
    pub async fn run(
        &self,
        speech: Vec<u8>,
        sink: &mut AudioSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let recognized = self
            .stage(Stage::Recognize, cancel, || self.recognizer.recognize(&speech))
            .await?;
        drop(speech);
        log::info!("Recognized: {}", recognized);
        self.emit(PipelineEvent::Recognized(recognized.clone()));

        let reply = self
            .stage(Stage::Generate, cancel, || self.generator.generate(&recognized))
            .await?;
        log::info!("Reply: {}", reply);
        self.emit(PipelineEvent::Generated(reply.clone()));

        let body = self
            .stage(Stage::Synthesize, cancel, || self.synthesizer.synthesize(&reply))
            .await?;

        let played = async {
            sink.begin().await?;
            let mut report = receive_stream(body, &self.stream, sink, cancel).await?;
            report.playback = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                finished = sink.finish() => finished?,
            };
            Ok::<_, PipelineError>(report)
        }
        .await;

        let report = match played {
            Ok(report) => report,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };
        self.emit(PipelineEvent::SynthesisFinished(report));

        Ok(PipelineOutcome {
            recognized,
            reply,
            report,
        })
    }

    /// One backend round trip, retried on network failures.
    async fn stage<T, F, Fut>(&self, stage: Stage, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.emit(PipelineEvent::StageStarted(stage));
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = op() => result,
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    log::warn!(
                        "{} failed: {}. Retry {}/{} in {:?}",
                        stage,
                        e,
                        attempt,
                        self.retry.max_retries,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    log::error!("{} failed: {}", stage, e);
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // the listener going away does not stop the pipeline
            let _ = events.send(event);
        }
    }
}
