use crate::audio::AudioEncoding;
use mac_address::get_mac_address;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const UNKNOWN_DEVICE: &str = "unknown-device";
const CUID_FILE_PATH: &str = "voice_agent_uuid.txt";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Client identifier sent to the recognition backend
    pub cuid: String,
    /// Sender name used in generation requests
    pub sender_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    pub local_ip: String,
    pub local_port: u16,
    pub sample_rate: u32,
    pub channels: u8,
    pub format: String,
    /// 单次语音的最大字节数（录音缓冲区大小）
    pub max_utterance_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatusConfig {
    pub enabled: bool,
    pub local_ip: String,
    pub local_port: u16,
    pub remote_ip: String,
    pub remote_port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecognitionConfig {
    pub url: String,
    pub token: String,
    pub response_buffer_size: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    pub url: String,
    pub api_key: String,
    pub group_id: String,
    pub model: String,
    pub bot_name: String,
    pub persona: String,
    pub tokens_to_generate: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub response_buffer_size: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SynthesisConfig {
    pub url: String,
    pub api_key: String,
    pub group_id: String,
    pub model: String,
    pub stream: bool,
    pub voice_id: String,
    pub speed: f32,
    pub vol: f32,
    pub pitch: i32,
    pub sample_rate: u32,
    pub bitrate: u32,
    pub format: AudioEncoding,
    pub channel: u8,
    pub response_buffer_size: usize,
    pub timeout_ms: u64,
    /// 流式响应两次数据之间允许的最长间隔
    pub idle_timeout_ms: u64,
    pub channel_depth: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    Stream,
    File,
}

impl FromStr for PlaybackMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Self::Stream),
            "file" => Ok(Self::File),
            _ => Err("PLAYBACK_MODE must be \"stream\" or \"file\""),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackBackendKind {
    Process,
    Alsa,
}

impl FromStr for PlaybackBackendKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(Self::Process),
            "alsa" => Ok(Self::Alsa),
            _ => Err("PLAYBACK_BACKEND must be \"process\" or \"alsa\""),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlaybackConfig {
    pub mode: PlaybackMode,
    pub file_path: String,
    pub backend: PlaybackBackendKind,
    pub player_command: String,
    pub player_args: Vec<String>,
    pub alsa_device: String,
    pub alsa_mixer_card: String,
    pub alsa_mixer_control: String,
    /// Percent restored on unmute
    pub volume: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    /// host:port probed before the agent starts accepting utterances
    pub probe_addr: String,
    pub probe_timeout_ms: u64,
    pub probe_interval_ms: u64,
    /// 仅对网络错误重试
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub device: DeviceConfig,
    pub capture: CaptureConfig,
    pub status: StatusConfig,
    pub recognition: RecognitionConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
    pub playback: PlaybackConfig,
    pub network: NetworkConfig,
}

fn parse<T: FromStr>(raw: &str, err: &'static str) -> Result<T, &'static str> {
    raw.parse().map_err(|_| err)
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME").to_string(),
            app_version: env!("APP_VERSION").to_string(),

            device: DeviceConfig {
                cuid: env!("DEVICE_CUID").to_string(),
                sender_name: env!("DEVICE_SENDER_NAME").to_string(),
            },

            capture: CaptureConfig {
                local_ip: env!("CAPTURE_LOCAL_IP").to_string(),
                local_port: parse(env!("CAPTURE_LOCAL_PORT"), "Failed to parse CAPTURE_LOCAL_PORT")?,
                sample_rate: parse(env!("CAPTURE_SAMPLE_RATE"), "Failed to parse CAPTURE_SAMPLE_RATE")?,
                channels: parse(env!("CAPTURE_CHANNELS"), "Failed to parse CAPTURE_CHANNELS")?,
                format: env!("CAPTURE_FORMAT").to_string(),
                max_utterance_bytes: parse(
                    env!("CAPTURE_MAX_UTTERANCE_BYTES"),
                    "Failed to parse CAPTURE_MAX_UTTERANCE_BYTES",
                )?,
            },

            status: StatusConfig {
                enabled: parse(env!("STATUS_ENABLED"), "Failed to parse STATUS_ENABLED")?,
                local_ip: env!("STATUS_LOCAL_IP").to_string(),
                local_port: parse(env!("STATUS_LOCAL_PORT"), "Failed to parse STATUS_LOCAL_PORT")?,
                remote_ip: env!("STATUS_REMOTE_IP").to_string(),
                remote_port: parse(env!("STATUS_REMOTE_PORT"), "Failed to parse STATUS_REMOTE_PORT")?,
            },

            recognition: RecognitionConfig {
                url: env!("RECOGNITION_URL").to_string(),
                token: env!("RECOGNITION_TOKEN").to_string(),
                response_buffer_size: parse(
                    env!("RECOGNITION_BUFFER_SIZE"),
                    "Failed to parse RECOGNITION_BUFFER_SIZE",
                )?,
                timeout_ms: parse(env!("RECOGNITION_TIMEOUT_MS"), "Failed to parse RECOGNITION_TIMEOUT_MS")?,
            },

            generation: GenerationConfig {
                url: env!("GENERATION_URL").to_string(),
                api_key: env!("GENERATION_API_KEY").to_string(),
                group_id: env!("GENERATION_GROUP_ID").to_string(),
                model: env!("GENERATION_MODEL").to_string(),
                bot_name: env!("GENERATION_BOT_NAME").to_string(),
                persona: env!("GENERATION_PERSONA").to_string(),
                tokens_to_generate: parse(env!("GENERATION_TOKENS"), "Failed to parse GENERATION_TOKENS")?,
                temperature: parse(env!("GENERATION_TEMPERATURE"), "Failed to parse GENERATION_TEMPERATURE")?,
                top_p: parse(env!("GENERATION_TOP_P"), "Failed to parse GENERATION_TOP_P")?,
                response_buffer_size: parse(
                    env!("GENERATION_BUFFER_SIZE"),
                    "Failed to parse GENERATION_BUFFER_SIZE",
                )?,
                timeout_ms: parse(env!("GENERATION_TIMEOUT_MS"), "Failed to parse GENERATION_TIMEOUT_MS")?,
            },

            synthesis: SynthesisConfig {
                url: env!("SYNTHESIS_URL").to_string(),
                api_key: env!("SYNTHESIS_API_KEY").to_string(),
                group_id: env!("SYNTHESIS_GROUP_ID").to_string(),
                model: env!("SYNTHESIS_MODEL").to_string(),
                stream: parse(env!("SYNTHESIS_STREAM"), "Failed to parse SYNTHESIS_STREAM")?,
                voice_id: env!("SYNTHESIS_VOICE_ID").to_string(),
                speed: parse(env!("SYNTHESIS_SPEED"), "Failed to parse SYNTHESIS_SPEED")?,
                vol: parse(env!("SYNTHESIS_VOL"), "Failed to parse SYNTHESIS_VOL")?,
                pitch: parse(env!("SYNTHESIS_PITCH"), "Failed to parse SYNTHESIS_PITCH")?,
                sample_rate: parse(env!("SYNTHESIS_SAMPLE_RATE"), "Failed to parse SYNTHESIS_SAMPLE_RATE")?,
                bitrate: parse(env!("SYNTHESIS_BITRATE"), "Failed to parse SYNTHESIS_BITRATE")?,
                format: parse(env!("SYNTHESIS_FORMAT"), "Failed to parse SYNTHESIS_FORMAT")?,
                channel: parse(env!("SYNTHESIS_CHANNEL"), "Failed to parse SYNTHESIS_CHANNEL")?,
                response_buffer_size: parse(
                    env!("SYNTHESIS_BUFFER_SIZE"),
                    "Failed to parse SYNTHESIS_BUFFER_SIZE",
                )?,
                timeout_ms: parse(env!("SYNTHESIS_TIMEOUT_MS"), "Failed to parse SYNTHESIS_TIMEOUT_MS")?,
                idle_timeout_ms: parse(
                    env!("SYNTHESIS_IDLE_TIMEOUT_MS"),
                    "Failed to parse SYNTHESIS_IDLE_TIMEOUT_MS",
                )?,
                channel_depth: parse(
                    env!("SYNTHESIS_CHANNEL_DEPTH"),
                    "Failed to parse SYNTHESIS_CHANNEL_DEPTH",
                )?,
            },

            playback: PlaybackConfig {
                mode: parse(env!("PLAYBACK_MODE"), "Failed to parse PLAYBACK_MODE")?,
                file_path: env!("PLAYBACK_FILE_PATH").to_string(),
                backend: parse(env!("PLAYBACK_BACKEND"), "Failed to parse PLAYBACK_BACKEND")?,
                player_command: env!("PLAYBACK_PLAYER_COMMAND").to_string(),
                player_args: env!("PLAYBACK_PLAYER_ARGS")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                alsa_device: env!("PLAYBACK_ALSA_DEVICE").to_string(),
                alsa_mixer_card: env!("PLAYBACK_ALSA_MIXER_CARD").to_string(),
                alsa_mixer_control: env!("PLAYBACK_ALSA_MIXER_CONTROL").to_string(),
                volume: parse(env!("PLAYBACK_VOLUME"), "Failed to parse PLAYBACK_VOLUME")?,
            },

            network: NetworkConfig {
                probe_addr: env!("NETWORK_PROBE_ADDR").to_string(),
                probe_timeout_ms: parse(env!("NETWORK_PROBE_TIMEOUT_MS"), "Failed to parse NETWORK_PROBE_TIMEOUT_MS")?,
                probe_interval_ms: parse(
                    env!("NETWORK_PROBE_INTERVAL_MS"),
                    "Failed to parse NETWORK_PROBE_INTERVAL_MS",
                )?,
                max_retries: parse(env!("NETWORK_MAX_RETRIES"), "Failed to parse NETWORK_MAX_RETRIES")?,
                retry_base_ms: parse(env!("NETWORK_RETRY_BASE_MS"), "Failed to parse NETWORK_RETRY_BASE_MS")?,
                retry_max_ms: parse(env!("NETWORK_RETRY_MAX_MS"), "Failed to parse NETWORK_RETRY_MAX_MS")?,
            },
        })
    }

    /// 运行时用环境变量覆盖密钥，避免把凭据编译进固件
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("BAIDU_ASR_TOKEN") {
            self.recognition.token = token;
        }
        if let Ok(key) = std::env::var("MINIMAX_API_KEY") {
            self.generation.api_key = key.clone();
            self.synthesis.api_key = key;
        }
        if let Ok(group) = std::env::var("MINIMAX_GROUP_ID") {
            self.generation.group_id = group.clone();
            self.synthesis.group_id = group;
        }
    }

    /// Check endpoints and buffer sizes before anything is allocated.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [
            ("recognition.url", &self.recognition.url),
            ("generation.url", &self.generation.url),
            ("synthesis.url", &self.synthesis.url),
        ] {
            let parsed = Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                anyhow::bail!("{} must be http(s), got {}", name, parsed.scheme());
            }
        }

        for (name, size) in [
            ("capture.max_utterance_bytes", self.capture.max_utterance_bytes),
            ("recognition.response_buffer_size", self.recognition.response_buffer_size),
            ("generation.response_buffer_size", self.generation.response_buffer_size),
            ("synthesis.response_buffer_size", self.synthesis.response_buffer_size),
            ("synthesis.channel_depth", self.synthesis.channel_depth),
        ] {
            if size == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        if self.playback.backend == PlaybackBackendKind::Process && self.playback.player_command.is_empty() {
            anyhow::bail!("playback.player_command is required for the process backend");
        }
        if self.playback.volume > 100 {
            anyhow::bail!("playback.volume must be 0-100, got {}", self.playback.volume);
        }
        Ok(())
    }
}

impl DeviceConfig {
    /// 设备标识处理：未配置时优先使用MAC地址，其次读取/生成本地保存的UUID
    pub fn resolve_cuid(&mut self) {
        if self.cuid != UNKNOWN_DEVICE {
            return;
        }

        if let Ok(Some(mac)) = get_mac_address() {
            self.cuid = mac.to_string().to_lowercase();
            log::info!("Using MAC address as cuid: {}", self.cuid);
            return;
        }

        if let Ok(content) = std::fs::read_to_string(CUID_FILE_PATH) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                self.cuid = trimmed.to_string();
                log::info!("Loaded cuid from file: {}", self.cuid);
                return;
            }
        }

        self.cuid = Uuid::new_v4().to_string();
        log::info!("Generated new cuid: {}", self.cuid);
        if let Err(e) = std::fs::write(CUID_FILE_PATH, &self.cuid) {
            log::warn!("Failed to save cuid to {}: {}", CUID_FILE_PATH, e);
        }
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.synthesis.response_buffer_size > 0);
        assert!(!config.generation.model.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::new().unwrap();
        config.generation.url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.generation.url = "ftp://example.com/chat".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::new().unwrap();
        config.synthesis.response_buffer_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("synthesis.response_buffer_size"));
    }

    #[test]
    fn test_validate_rejects_volume_above_100() {
        let mut config = Config::new().unwrap();
        assert!(config.playback.volume <= 100);
        config.playback.volume = 101;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("playback.volume"));
    }

    #[test]
    fn test_playback_mode_from_str() {
        assert_eq!("file".parse::<PlaybackMode>(), Ok(PlaybackMode::File));
        assert_eq!("stream".parse::<PlaybackMode>(), Ok(PlaybackMode::Stream));
        assert!("tape".parse::<PlaybackMode>().is_err());
    }

    #[test]
    fn test_configured_cuid_is_kept() {
        let mut device = DeviceConfig {
            cuid: "box-01".to_string(),
            sender_name: "box".to_string(),
        };
        device.resolve_cuid();
        assert_eq!(device.cuid, "box-01");
    }
}
