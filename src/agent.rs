use crate::audio::AudioSink;
use crate::capture_bridge::CaptureEvent;
use crate::error::{PipelineError, Stage};
use crate::pipeline::{Orchestrator, PipelineEvent, PipelineOutcome};
use crate::status_bridge::{ControlEvent, StatusBridge, StatusMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Recognizing,
    Generating,
    Speaking,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Recognizing => "recognizing",
            AgentState::Generating => "generating",
            AgentState::Speaking => "speaking",
        }
    }
}

pub type RunResult = Result<PipelineOutcome, PipelineError>;

/// Owns the orchestrator and the audio sink and runs at most one pipeline at
/// a time. The sink travels into the run task and comes back with its result,
/// so "sink present" and "idle" are the same thing.
pub struct Agent {
    orchestrator: Arc<Orchestrator>,
    sink: Option<AudioSink>,
    state: AgentState,
    current: Option<CancellationToken>,
    pause_tx: watch::Sender<bool>,
    events_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    done_tx: mpsc::Sender<(AudioSink, RunResult)>,
    done_rx: mpsc::Receiver<(AudioSink, RunResult)>,
    status: Option<Arc<StatusBridge>>,
}

impl Agent {
    pub fn new(orchestrator: Orchestrator, sink: AudioSink) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (pause_tx, pause_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(1);

        Self {
            orchestrator: Arc::new(orchestrator.with_events(events_tx)),
            sink: Some(sink.with_pause(pause_rx)),
            state: AgentState::Idle,
            current: None,
            pause_tx,
            events_rx,
            done_tx,
            done_rx,
            status: None,
        }
    }

    pub fn with_status(mut self, status: Arc<StatusBridge>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.sink.is_none()
    }

    /// Start a pipeline run for `speech`. Returns `false` (and drops the
    /// utterance) while a previous run is still in progress.
    pub async fn submit(&mut self, speech: Vec<u8>) -> bool {
        let Some(mut sink) = self.sink.take() else {
            log::warn!(
                "Busy ({}), dropping utterance of {} bytes",
                self.state.as_str(),
                speech.len()
            );
            return false;
        };

        let cancel = CancellationToken::new();
        self.current = Some(cancel.clone());
        self.pause_tx.send_replace(false);
        self.set_state(AgentState::Recognizing).await;

        let orchestrator = self.orchestrator.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = orchestrator.run(speech, &mut sink, &cancel).await;
            if done_tx.send((sink, result)).await.is_err() {
                log::warn!("Agent gone before the pipeline finished");
            }
        });
        true
    }

    pub fn control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Cancel => match &self.current {
                Some(cancel) => {
                    log::info!("Cancelling current pipeline");
                    cancel.cancel();
                }
                None => log::debug!("Nothing to cancel"),
            },
            ControlEvent::Pause => {
                self.pause_tx.send_replace(true);
            }
            ControlEvent::Resume => {
                self.pause_tx.send_replace(false);
            }
        }
    }

    /// Wait for the run in progress, if any, and return its result.
    pub async fn wait_idle(&mut self) -> Option<RunResult> {
        if !self.is_busy() {
            return None;
        }
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.on_pipeline_event(event).await,
                Some((sink, result)) = self.done_rx.recv() => {
                    return Some(self.on_finished(sink, result).await);
                }
            }
        }
    }

    /// 主事件循环：语音输入、显示进程控制、流水线事件
    pub async fn run(
        mut self,
        mut capture_rx: mpsc::Receiver<CaptureEvent>,
        mut control_rx: mpsc::Receiver<ControlEvent>,
        shutdown: CancellationToken,
    ) {
        log::info!("Agent started. State: {}", self.state.as_str());
        self.set_state(AgentState::Idle).await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("Agent shutting down...");
                    self.control(ControlEvent::Cancel);
                    self.wait_idle().await;
                    break;
                }

                Some(event) = capture_rx.recv() => match event {
                    CaptureEvent::Utterance(speech) => {
                        self.submit(speech).await;
                    }
                    CaptureEvent::Dropped(e) => {
                        log::warn!("Utterance dropped: {}", e);
                        self.notify(StatusMessage::Error { message: e.to_string() }).await;
                    }
                },

                Some(control) = control_rx.recv() => self.control(control),

                Some(event) = self.events_rx.recv() => self.on_pipeline_event(event).await,

                Some((sink, result)) = self.done_rx.recv() => {
                    let _ = self.on_finished(sink, result).await;
                }

                else => break,
            }
        }
    }

    async fn on_pipeline_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted(Stage::Recognize) => self.set_state(AgentState::Recognizing).await,
            PipelineEvent::StageStarted(Stage::Generate) => self.set_state(AgentState::Generating).await,
            PipelineEvent::StageStarted(Stage::Synthesize) => self.set_state(AgentState::Speaking).await,
            PipelineEvent::Recognized(text) => self.notify(StatusMessage::Stt { text }).await,
            PipelineEvent::Generated(text) => self.notify(StatusMessage::Llm { text }).await,
            PipelineEvent::SynthesisFinished(report) => {
                log::debug!("Synthesis report: {:?}", report);
            }
        }
    }

    async fn on_finished(&mut self, sink: AudioSink, result: RunResult) -> RunResult {
        // events sent before the result still belong to this run
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_pipeline_event(event).await;
        }

        self.sink = Some(sink);
        self.current = None;
        self.pause_tx.send_replace(false);

        match &result {
            Ok(outcome) => log::info!(
                "Pipeline done: \"{}\" -> \"{}\" ({} audio bytes)",
                outcome.recognized,
                outcome.reply,
                outcome.report.playback.bytes
            ),
            Err(PipelineError::Cancelled) => log::info!("Pipeline cancelled"),
            Err(e) => {
                log::error!("Pipeline failed: {}", e);
                self.notify(StatusMessage::Error { message: e.to_string() }).await;
            }
        }

        self.set_state(AgentState::Idle).await;
        result
    }

    async fn set_state(&mut self, state: AgentState) {
        if self.state != state {
            log::debug!("State {} -> {}", self.state.as_str(), state.as_str());
        }
        self.state = state;
        self.notify(StatusMessage::State { state: state.as_str() }).await;
    }

    // &mut: Agent is Send but not Sync
    async fn notify(&mut self, message: StatusMessage) {
        if let Some(status) = &self.status {
            if let Err(e) = status.send(&message).await {
                log::warn!("Failed to send to display: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioEncoding, AudioFormat, RecordingPlayback};
    use crate::backend::{
        ChatGenerator, Framing, SpeechRecognizer, SpeechSynthesizer, SynthesisBody,
    };
    use crate::config::PlaybackMode;
    use crate::pipeline::StreamSettings;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use futures_util::stream;
    use std::time::Duration;

    struct Recognizer;

    #[async_trait]
    impl SpeechRecognizer for Recognizer {
        async fn recognize(&self, speech: &[u8]) -> crate::error::Result<String> {
            Ok(format!("{} bytes", speech.len()))
        }
    }

    struct Generator;

    #[async_trait]
    impl ChatGenerator for Generator {
        async fn generate(&self, text: &str) -> crate::error::Result<String> {
            Ok(format!("heard {}", text))
        }
    }

    /// Streams one audio frame, or hangs forever when `stall` is set.
    struct Synthesizer {
        stall: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for Synthesizer {
        async fn synthesize(&self, _text: &str) -> crate::error::Result<SynthesisBody> {
            let stream = if self.stall {
                stream::pending().boxed()
            } else {
                stream::iter(vec![Ok(Bytes::from_static(b"data: {\"data\":{\"audio\":\"0102\"}}\n"))]).boxed()
            };
            Ok(SynthesisBody {
                stream,
                framing: Framing::EventStream,
            })
        }
    }

    fn agent(stall: bool, recorder: &RecordingPlayback) -> Agent {
        let orchestrator = Orchestrator::new(
            Arc::new(Recognizer),
            Arc::new(Generator),
            Arc::new(Synthesizer { stall }),
            StreamSettings {
                capacity: 1024,
                channel_depth: 4,
                idle_timeout: Duration::from_secs(30),
            },
        );
        let format = AudioFormat {
            sample_rate: 16000,
            bits_per_sample: 16,
            channels: 1,
            encoding: AudioEncoding::Mp3,
        };
        let sink = AudioSink::new(PlaybackMode::Stream, Box::new(recorder.clone()), format, "/unused");
        Agent::new(orchestrator, sink)
    }

    #[tokio::test]
    async fn test_utterances_are_rejected_while_busy() {
        let recorder = RecordingPlayback::new();
        let mut agent = agent(false, &recorder);

        assert!(agent.submit(vec![0; 4]).await);
        assert!(agent.is_busy());
        assert!(!agent.submit(vec![0; 8]).await);

        let outcome = agent.wait_idle().await.unwrap().unwrap();
        assert_eq!(outcome.recognized, "4 bytes");
        assert_eq!(outcome.reply, "heard 4 bytes");
        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(recorder.written(), vec![0x01, 0x02]);

        // idle again, so the next utterance is accepted
        assert!(agent.submit(vec![0; 2]).await);
        assert!(agent.wait_idle().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let recorder = RecordingPlayback::new();
        let mut agent = agent(true, &recorder);

        assert!(agent.submit(vec![0; 4]).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        agent.control(ControlEvent::Cancel);

        let result = agent.wait_idle().await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(!agent.is_busy());
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_wait_idle_without_run() {
        let recorder = RecordingPlayback::new();
        let mut agent = agent(false, &recorder);
        assert!(agent.wait_idle().await.is_none());
    }
}
