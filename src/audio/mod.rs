//! audio - Playback side of the assistant
//!
//! Decoded synthesis audio is handed to an [`AudioSink`], which drives one of
//! the [`PlaybackBackend`] implementations: an external player process, ALSA
//! (behind the `alsa` feature) or an in-memory recorder.

#[cfg(feature = "alsa")]
mod alsa_device;
#[cfg(feature = "alsa")]
mod alsa_playback;
mod process_playback;
mod recording;
mod sink;
#[cfg(any(feature = "alsa", test))]
pub mod stream_decoder;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{PlaybackBackendKind, PlaybackConfig, SynthesisConfig};

#[cfg(feature = "alsa")]
pub use alsa_playback::AlsaPlayback;
pub use process_playback::ProcessPlayback;
pub use recording::{PlaybackEvent, RecordingPlayback};
pub use sink::{AudioSink, SinkReport, SinkState};

/// Container/codec of the audio bytes returned by the synthesis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    Mp3,
    Pcm,
    Flac,
    Wav,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Mp3 => "mp3",
            AudioEncoding::Pcm => "pcm",
            AudioEncoding::Flac => "flac",
            AudioEncoding::Wav => "wav",
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mp3" => Ok(AudioEncoding::Mp3),
            "pcm" => Ok(AudioEncoding::Pcm),
            "flac" => Ok(AudioEncoding::Flac),
            "wav" => Ok(AudioEncoding::Wav),
            other => Err(format!("Unsupported audio format: {}", other)),
        }
    }
}

/// Output settings a playback session is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub encoding: AudioEncoding,
}

impl AudioFormat {
    /// The fixed output settings requested from the synthesis backend.
    pub fn from_synthesis(config: &SynthesisConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            bits_per_sample: 16,
            channels: config.channel as u16,
            encoding: config.format,
        }
    }
}

/// Codec/output device the sink drives.
///
/// A session is always opened as `set_mute(true)`, `configure`,
/// `set_mute(false)` before the first `write`.
#[async_trait]
pub trait PlaybackBackend: Send {
    /// Reconfigure output for `format`, replacing any previous session.
    async fn configure(&mut self, format: &AudioFormat) -> Result<()>;

    async fn set_mute(&mut self, mute: bool) -> Result<()>;

    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Block until everything written so far has been played.
    async fn drain(&mut self) -> Result<()>;

    /// Drop unplayed audio and close the session.
    async fn stop(&mut self) -> Result<()>;
}

/// Build the backend selected in `[playback]`.
pub fn open_backend(config: &PlaybackConfig) -> Result<Box<dyn PlaybackBackend>> {
    match config.backend {
        PlaybackBackendKind::Process => Ok(Box::new(ProcessPlayback::new(
            config.player_command.clone(),
            config.player_args.clone(),
        ))),
        #[cfg(feature = "alsa")]
        PlaybackBackendKind::Alsa => Ok(Box::new(AlsaPlayback::new(
            config.alsa_device.clone(),
            config.alsa_mixer_card.clone(),
            config.alsa_mixer_control.clone(),
            config.volume,
        ))),
        #[cfg(not(feature = "alsa"))]
        PlaybackBackendKind::Alsa => {
            anyhow::bail!("playback.backend = \"alsa\" requires building with the `alsa` feature")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("mp3".parse::<AudioEncoding>().unwrap(), AudioEncoding::Mp3);
        assert_eq!("pcm".parse::<AudioEncoding>().unwrap(), AudioEncoding::Pcm);
        assert!("opus".parse::<AudioEncoding>().is_err());
        assert_eq!(AudioEncoding::Flac.to_string(), "flac");
    }

    #[test]
    fn test_format_follows_synthesis_settings() {
        let config = crate::config::Config::new().unwrap();
        let format = AudioFormat::from_synthesis(&config.synthesis);
        assert_eq!(format.sample_rate, config.synthesis.sample_rate);
        assert_eq!(format.channels, config.synthesis.channel as u16);
        assert_eq!(format.bits_per_sample, 16);
    }
}
