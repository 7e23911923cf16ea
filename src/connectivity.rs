use crate::config::NetworkConfig;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

pub enum ProbeResult {
    Online,
    Offline(String),
}

/// One bounded TCP connect to the backend host.
pub async fn probe(addr: &str, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => ProbeResult::Online,
        Ok(Err(e)) => ProbeResult::Offline(format!("connect to {} failed: {}", addr, e)),
        Err(_) => ProbeResult::Offline(format!("connect to {} timed out after {:?}", addr, timeout)),
    }
}

/// 在接受语音前等待网络可用，失败时按固定间隔重试
///
/// Returns `false` if `shutdown` fires first.
pub async fn wait_for_network(config: &NetworkConfig, shutdown: &CancellationToken) -> bool {
    let timeout = Duration::from_millis(config.probe_timeout_ms);
    let interval = Duration::from_millis(config.probe_interval_ms);

    loop {
        match probe(&config.probe_addr, timeout).await {
            ProbeResult::Online => {
                log::info!("Network available ({})", config.probe_addr);
                return true;
            }
            ProbeResult::Offline(reason) => {
                log::warn!("Network unavailable: {}. Retrying in {:?}...", reason, interval);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
