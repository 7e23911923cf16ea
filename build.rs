use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    device: Device,
    capture: Capture,
    status: Status,
    recognition: Recognition,
    generation: Generation,
    synthesis: Synthesis,
    playback: Playback,
    network: Network,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Device {
    cuid: String,
    sender_name: String,
}

#[derive(Deserialize)]
struct Capture {
    local_ip: String,
    local_port: u16,
    sample_rate: u32,
    channels: u8,
    format: String,
    max_utterance_bytes: usize,
}

#[derive(Deserialize)]
struct Status {
    enabled: bool,
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
}

#[derive(Deserialize)]
struct Recognition {
    url: String,
    token: String,
    response_buffer_size: usize,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct Generation {
    url: String,
    api_key: String,
    group_id: String,
    model: String,
    bot_name: String,
    persona: String,
    tokens_to_generate: u32,
    temperature: f32,
    top_p: f32,
    response_buffer_size: usize,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct Synthesis {
    url: String,
    api_key: String,
    group_id: String,
    model: String,
    stream: bool,
    voice_id: String,
    speed: f32,
    vol: f32,
    pitch: i32,
    sample_rate: u32,
    bitrate: u32,
    format: String,
    channel: u8,
    response_buffer_size: usize,
    timeout_ms: u64,
    idle_timeout_ms: u64,
    channel_depth: usize,
}

#[derive(Deserialize)]
struct Playback {
    mode: String,
    file_path: String,
    backend: String,
    player_command: String,
    player_args: String,
    alsa_device: String,
    alsa_mixer_card: String,
    alsa_mixer_control: String,
    volume: u8,
}

#[derive(Deserialize)]
struct Network {
    probe_addr: String,
    probe_timeout_ms: u64,
    probe_interval_ms: u64,
    max_retries: u32,
    retry_base_ms: u64,
    retry_max_ms: u64,
}

fn emit(key: &str, value: impl std::fmt::Display) {
    println!("cargo:rustc-env={}={}", key, value);
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    emit("APP_NAME", &config.application.name);
    emit("APP_VERSION", &config.application.version);

    emit("DEVICE_CUID", &config.device.cuid);
    emit("DEVICE_SENDER_NAME", &config.device.sender_name);

    emit("CAPTURE_LOCAL_IP", &config.capture.local_ip);
    emit("CAPTURE_LOCAL_PORT", config.capture.local_port);
    emit("CAPTURE_SAMPLE_RATE", config.capture.sample_rate);
    emit("CAPTURE_CHANNELS", config.capture.channels);
    emit("CAPTURE_FORMAT", &config.capture.format);
    emit("CAPTURE_MAX_UTTERANCE_BYTES", config.capture.max_utterance_bytes);

    emit("STATUS_ENABLED", config.status.enabled);
    emit("STATUS_LOCAL_IP", &config.status.local_ip);
    emit("STATUS_LOCAL_PORT", config.status.local_port);
    emit("STATUS_REMOTE_IP", &config.status.remote_ip);
    emit("STATUS_REMOTE_PORT", config.status.remote_port);

    emit("RECOGNITION_URL", &config.recognition.url);
    emit("RECOGNITION_TOKEN", &config.recognition.token);
    emit("RECOGNITION_BUFFER_SIZE", config.recognition.response_buffer_size);
    emit("RECOGNITION_TIMEOUT_MS", config.recognition.timeout_ms);

    emit("GENERATION_URL", &config.generation.url);
    emit("GENERATION_API_KEY", &config.generation.api_key);
    emit("GENERATION_GROUP_ID", &config.generation.group_id);
    emit("GENERATION_MODEL", &config.generation.model);
    emit("GENERATION_BOT_NAME", &config.generation.bot_name);
    emit("GENERATION_PERSONA", &config.generation.persona);
    emit("GENERATION_TOKENS", config.generation.tokens_to_generate);
    emit("GENERATION_TEMPERATURE", config.generation.temperature);
    emit("GENERATION_TOP_P", config.generation.top_p);
    emit("GENERATION_BUFFER_SIZE", config.generation.response_buffer_size);
    emit("GENERATION_TIMEOUT_MS", config.generation.timeout_ms);

    emit("SYNTHESIS_URL", &config.synthesis.url);
    emit("SYNTHESIS_API_KEY", &config.synthesis.api_key);
    emit("SYNTHESIS_GROUP_ID", &config.synthesis.group_id);
    emit("SYNTHESIS_MODEL", &config.synthesis.model);
    emit("SYNTHESIS_STREAM", config.synthesis.stream);
    emit("SYNTHESIS_VOICE_ID", &config.synthesis.voice_id);
    emit("SYNTHESIS_SPEED", config.synthesis.speed);
    emit("SYNTHESIS_VOL", config.synthesis.vol);
    emit("SYNTHESIS_PITCH", config.synthesis.pitch);
    emit("SYNTHESIS_SAMPLE_RATE", config.synthesis.sample_rate);
    emit("SYNTHESIS_BITRATE", config.synthesis.bitrate);
    emit("SYNTHESIS_FORMAT", &config.synthesis.format);
    emit("SYNTHESIS_CHANNEL", config.synthesis.channel);
    emit("SYNTHESIS_BUFFER_SIZE", config.synthesis.response_buffer_size);
    emit("SYNTHESIS_TIMEOUT_MS", config.synthesis.timeout_ms);
    emit("SYNTHESIS_IDLE_TIMEOUT_MS", config.synthesis.idle_timeout_ms);
    emit("SYNTHESIS_CHANNEL_DEPTH", config.synthesis.channel_depth);

    emit("PLAYBACK_MODE", &config.playback.mode);
    emit("PLAYBACK_FILE_PATH", &config.playback.file_path);
    emit("PLAYBACK_BACKEND", &config.playback.backend);
    emit("PLAYBACK_PLAYER_COMMAND", &config.playback.player_command);
    emit("PLAYBACK_PLAYER_ARGS", &config.playback.player_args);
    emit("PLAYBACK_ALSA_DEVICE", &config.playback.alsa_device);
    emit("PLAYBACK_ALSA_MIXER_CARD", &config.playback.alsa_mixer_card);
    emit("PLAYBACK_ALSA_MIXER_CONTROL", &config.playback.alsa_mixer_control);
    emit("PLAYBACK_VOLUME", config.playback.volume);

    emit("NETWORK_PROBE_ADDR", &config.network.probe_addr);
    emit("NETWORK_PROBE_TIMEOUT_MS", config.network.probe_timeout_ms);
    emit("NETWORK_PROBE_INTERVAL_MS", config.network.probe_interval_ms);
    emit("NETWORK_MAX_RETRIES", config.network.max_retries);
    emit("NETWORK_RETRY_BASE_MS", config.network.retry_base_ms);
    emit("NETWORK_RETRY_MAX_MS", config.network.retry_max_ms);
}
