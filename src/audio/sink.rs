//! Audio sink: where decoded synthesis chunks end up.

use std::collections::VecDeque;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use super::{AudioFormat, PlaybackBackend};
use crate::config::PlaybackMode;
use crate::error::{PipelineError, Result};
use crate::frame_decoder::AudioChunk;

/// Replay chunk size for stored replies.
const REPLAY_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Playing,
    Paused,
}

/// What one reply amounted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub chunks: usize,
    pub bytes: usize,
}

pub struct AudioSink {
    mode: PlaybackMode,
    backend: Box<dyn PlaybackBackend>,
    format: AudioFormat,
    file_path: PathBuf,
    state: SinkState,
    store: Option<File>,
    // chunks received while paused
    held: VecDeque<AudioChunk>,
    pause: Option<watch::Receiver<bool>>,
    report: SinkReport,
}

impl AudioSink {
    pub fn new(
        mode: PlaybackMode,
        backend: Box<dyn PlaybackBackend>,
        format: AudioFormat,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode,
            backend,
            format,
            file_path: file_path.into(),
            state: SinkState::Idle,
            store: None,
            held: VecDeque::new(),
            pause: None,
            report: SinkReport::default(),
        }
    }

    /// Follow a pause switch (`true` = paused) while streaming.
    pub fn with_pause(mut self, pause: watch::Receiver<bool>) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Prepare for a new reply.
    pub async fn begin(&mut self) -> Result<()> {
        self.held.clear();
        self.report = SinkReport::default();
        match self.mode {
            PlaybackMode::File => {
                self.store = Some(File::create(&self.file_path).await?);
                log::debug!("Storing reply in {}", self.file_path.display());
            }
            PlaybackMode::Stream => self.open_session().await?,
        }
        Ok(())
    }

    /// Take ownership of one decoded chunk.
    pub async fn push(&mut self, chunk: AudioChunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.report.chunks += 1;
        self.report.bytes += chunk.len();

        match self.mode {
            PlaybackMode::File => {
                let store = self
                    .store
                    .as_mut()
                    .ok_or_else(|| PipelineError::Playback("sink not started".to_string()))?;
                store.write_all(chunk.as_bytes()).await?;
            }
            PlaybackMode::Stream => {
                if self.is_paused() {
                    if self.state != SinkState::Paused {
                        log::info!("Playback paused");
                        self.state = SinkState::Paused;
                    }
                    self.held.push_back(chunk);
                    return Ok(());
                }
                self.flush_held().await?;
                self.write(chunk.as_bytes()).await?;
            }
        }
        Ok(())
    }

    /// End of reply: play whatever is outstanding and wait for the device.
    pub async fn finish(&mut self) -> Result<SinkReport> {
        match self.mode {
            PlaybackMode::File => {
                if let Some(mut store) = self.store.take() {
                    store.flush().await?;
                }
                self.replay_store().await?;
            }
            PlaybackMode::Stream => {
                self.wait_resumed().await;
                self.flush_held().await?;
            }
        }

        self.backend.drain().await.map_err(PipelineError::playback)?;
        self.state = SinkState::Idle;
        log::info!(
            "Playback finished: {} chunks, {} bytes",
            self.report.chunks,
            self.report.bytes
        );
        Ok(self.report)
    }

    /// Drop everything and silence the output.
    pub async fn abort(&mut self) {
        self.store = None;
        self.held.clear();
        if self.state != SinkState::Idle {
            if let Err(e) = self.backend.stop().await {
                log::warn!("Failed to stop playback: {:#}", e);
            }
        }
        self.state = SinkState::Idle;
    }

    /// Mute, reconfigure, unmute. Nothing is written before this completes.
    async fn open_session(&mut self) -> Result<()> {
        self.backend.set_mute(true).await.map_err(PipelineError::playback)?;
        self.backend
            .configure(&self.format)
            .await
            .map_err(PipelineError::playback)?;
        self.backend.set_mute(false).await.map_err(PipelineError::playback)?;
        self.state = SinkState::Playing;
        Ok(())
    }

    async fn replay_store(&mut self) -> Result<()> {
        let mut file = File::open(&self.file_path).await?;
        self.open_session().await?;

        let mut buf = vec![0u8; REPLAY_CHUNK_SIZE];
        loop {
            self.wait_resumed().await;
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n]).await?;
        }
        Ok(())
    }

    async fn flush_held(&mut self) -> Result<()> {
        if self.held.is_empty() {
            return Ok(());
        }
        if self.state == SinkState::Paused {
            log::info!("Playback resumed, {} chunks held", self.held.len());
            self.state = SinkState::Playing;
        }
        while let Some(chunk) = self.held.pop_front() {
            self.write(chunk.as_bytes()).await?;
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.backend.write(data).await.map_err(PipelineError::playback)
    }

    fn is_paused(&self) -> bool {
        self.pause.as_ref().is_some_and(|p| *p.borrow())
    }

    async fn wait_resumed(&mut self) {
        if let Some(pause) = self.pause.as_mut() {
            if *pause.borrow() {
                self.state = SinkState::Paused;
                // a dropped sender counts as resumed
                let _ = pause.wait_for(|paused| !*paused).await;
            }
        }
        if self.state == SinkState::Paused {
            self.state = SinkState::Playing;
        }
    }
}
