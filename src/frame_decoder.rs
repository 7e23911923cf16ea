//! Turns one synthesis frame into an owned chunk of audio bytes.
//!
//! Every failure here is local to the frame: it is logged, counted and the
//! stream carries on with the next frame.

use serde::Deserialize;

/// Status block MiniMax attaches to replies and stream frames.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct BaseResp {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status_msg: String,
}

#[derive(Debug, Deserialize)]
struct SynthesisFrame {
    #[serde(default)]
    data: Option<FrameData>,
    #[serde(default)]
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Deserialize)]
struct FrameData {
    #[serde(default)]
    audio: Option<String>,
}

/// Decoded audio bytes from one frame, owned by whoever holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Vec<u8>);

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-stream decode counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames handed to the decoder
    pub frames: usize,
    /// Frames that produced audio
    pub chunks: usize,
    /// Frames without audio (metadata, keep-alives)
    pub empty: usize,
    /// Frames dropped because they could not be decoded
    pub skipped: usize,
    /// Decoded audio bytes
    pub audio_bytes: usize,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decode one frame payload (the bytes between `data:` and the newline).
    ///
    /// Returns `None` for frames that carry no audio or cannot be decoded.
    pub fn decode(&mut self, frame: &[u8]) -> Option<AudioChunk> {
        self.stats.frames += 1;

        let payload = frame.trim_ascii();
        if payload.is_empty() {
            self.stats.empty += 1;
            return None;
        }

        let parsed: SynthesisFrame = match serde_json::from_slice(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Skipping malformed synthesis frame ({} bytes): {}", payload.len(), e);
                self.stats.skipped += 1;
                return None;
            }
        };

        if let Some(base) = &parsed.base_resp {
            if base.status_code != 0 {
                log::warn!(
                    "Synthesis frame reports error {}: {}",
                    base.status_code,
                    base.status_msg
                );
            }
        }

        let hex_audio = match parsed.data.and_then(|d| d.audio) {
            Some(audio) if !audio.is_empty() => audio,
            _ => {
                log::debug!("Synthesis frame without audio");
                self.stats.empty += 1;
                return None;
            }
        };

        match hex::decode(&hex_audio) {
            Ok(bytes) => {
                self.stats.chunks += 1;
                self.stats.audio_bytes += bytes.len();
                Some(AudioChunk::new(bytes))
            }
            Err(e) => {
                log::warn!("Skipping frame with bad hex audio ({} chars): {}", hex_audio.len(), e);
                self.stats.skipped += 1;
                None
            }
        }
    }
}
