//! In-memory playback backend that records every call.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::{AudioFormat, PlaybackBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Configure(AudioFormat),
    Mute(bool),
    Write(Vec<u8>),
    Drain,
    Stop,
}

/// Records what a sink asks of its output device. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPlayback {
    events: Arc<Mutex<Vec<PlaybackEvent>>>,
}

impl RecordingPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Concatenation of all written audio.
    pub fn written(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PlaybackEvent::Write(data) => Some(data),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PlaybackEvent::Write(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: PlaybackEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl PlaybackBackend for RecordingPlayback {
    async fn configure(&mut self, format: &AudioFormat) -> Result<()> {
        self.record(PlaybackEvent::Configure(*format));
        Ok(())
    }

    async fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.record(PlaybackEvent::Mute(mute));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.record(PlaybackEvent::Write(data.to_vec()));
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        self.record(PlaybackEvent::Drain);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.record(PlaybackEvent::Stop);
        Ok(())
    }
}
