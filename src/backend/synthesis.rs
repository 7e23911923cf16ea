//! MiniMax text to speech (`t2a_v2`).

use async_trait::async_trait;
use serde::Serialize;

use super::{Framing, HttpStage, SpeechSynthesizer, SynthesisBody, body_stream};
use crate::config::SynthesisConfig;
use crate::error::{Result, Stage};

#[derive(Debug, Serialize)]
struct VoiceSetting<'a> {
    voice_id: &'a str,
    speed: f32,
    vol: f32,
    pitch: i32,
}

#[derive(Debug, Serialize)]
struct AudioSetting<'a> {
    sample_rate: u32,
    bitrate: u32,
    format: &'a str,
    channel: u8,
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    model: &'a str,
    text: &'a str,
    stream: bool,
    voice_setting: VoiceSetting<'a>,
    audio_setting: AudioSetting<'a>,
}

pub struct MiniMaxSynthesizer {
    http: HttpStage,
    config: SynthesisConfig,
}

impl MiniMaxSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        Ok(Self {
            http: HttpStage::new(Stage::Synthesize, config.timeout())?,
            config: config.clone(),
        })
    }

    fn request<'a>(&'a self, text: &'a str) -> SynthesisRequest<'a> {
        SynthesisRequest {
            model: &self.config.model,
            text,
            stream: self.config.stream,
            voice_setting: VoiceSetting {
                voice_id: &self.config.voice_id,
                speed: self.config.speed,
                vol: self.config.vol,
                pitch: self.config.pitch,
            },
            audio_setting: AudioSetting {
                sample_rate: self.config.sample_rate,
                bitrate: self.config.bitrate,
                format: self.config.format.as_str(),
                channel: self.config.channel,
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MiniMaxSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesisBody> {
        let request = self.request(text);
        log::info!(
            "Synthesizing {} chars (stream: {}, voice: {})",
            text.chars().count(),
            self.config.stream,
            self.config.voice_id
        );

        // the deadline covers the response head; the body has its own idle timeout
        let response = self
            .http
            .bounded(self.http.post_json(
                &self.config.url,
                Some(self.config.api_key.as_str()),
                &[("GroupId", self.config.group_id.as_str())],
                &request,
            ))
            .await?;

        let framing = if self.config.stream {
            Framing::EventStream
        } else {
            Framing::Document
        };
        Ok(SynthesisBody {
            stream: body_stream(response),
            framing,
        })
    }
}
