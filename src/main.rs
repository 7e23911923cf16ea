use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_agent_rs::agent::Agent;
use voice_agent_rs::audio::{self, AudioFormat, AudioSink};
use voice_agent_rs::capture_bridge::{CaptureBridge, CaptureEvent};
use voice_agent_rs::config::Config;
use voice_agent_rs::connectivity;
use voice_agent_rs::pipeline::Orchestrator;
use voice_agent_rs::status_bridge::{ControlEvent, StatusBridge, StatusMessage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info 级别，可用 RUST_LOG 覆盖
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 加载配置
    let mut config = Config::new().map_err(anyhow::Error::msg)?;
    config.apply_env_overrides();
    config.device.resolve_cuid();
    config.validate().context("Invalid configuration")?;

    log::info!(
        "{} {} starting (cuid: {}, playback: {:?}/{:?})",
        config.app_name,
        config.app_version,
        config.device.cuid,
        config.playback.mode,
        config.playback.backend
    );

    let shutdown = CancellationToken::new();

    // 显示进程通道
    let (tx_control, rx_control) = mpsc::channel::<ControlEvent>(16);

    // 启动状态桥，优先启动，用于显示网络状态
    let status_bridge = if config.status.enabled {
        let bridge = Arc::new(StatusBridge::new(&config.status, tx_control).await?);
        let bridge_clone = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge_clone.run().await {
                log::error!("StatusBridge error: {}", e);
            }
        });
        Some(bridge)
    } else {
        None
    };

    // 网络可用后才开始接受语音
    let waiting = tokio::select! {
        online = connectivity::wait_for_network(&config.network, &shutdown) => online,
        _ = signal::ctrl_c() => false,
    };
    if !waiting {
        log::info!("Shut down before the network came up");
        return Ok(());
    }
    if let Some(bridge) = &status_bridge {
        if let Err(e) = bridge.send(&StatusMessage::State { state: "online" }).await {
            log::warn!("Failed to send to display: {}", e);
        }
    }

    // 流水线和播放
    let orchestrator = Orchestrator::from_config(&config)?;
    let backend = audio::open_backend(&config.playback)?;
    let sink = AudioSink::new(
        config.playback.mode,
        backend,
        AudioFormat::from_synthesis(&config.synthesis),
        &config.playback.file_path,
    );
    let mut agent = Agent::new(orchestrator, sink);
    if let Some(bridge) = status_bridge {
        agent = agent.with_status(bridge);
    }

    // 启动录音桥，与录音进程通信
    let (tx_capture, rx_capture) = mpsc::channel::<CaptureEvent>(4);
    let capture_bridge = CaptureBridge::new(&config.capture, tx_capture).await?;
    log::info!("Waiting for utterances on {}", capture_bridge.local_addr()?);
    tokio::spawn(async move {
        if let Err(e) = capture_bridge.run().await {
            log::error!("CaptureBridge error: {}", e);
        }
    });

    let agent_task = tokio::spawn(agent.run(rx_capture, rx_control, shutdown.clone()));

    signal::ctrl_c().await?;
    log::info!("Received Ctrl+C, shutting down...");
    shutdown.cancel();
    agent_task.await?;
    Ok(())
}
