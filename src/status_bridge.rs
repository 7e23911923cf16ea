use crate::config::StatusConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Control requests coming back from the display process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlEvent {
    Cancel,
    Pause,
    Resume,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InboundMessage {
    Control { action: ControlEvent },
}

/// What the display process is told.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatusMessage {
    State { state: &'static str },
    Stt { text: String },
    Llm { text: String },
    Error { message: String },
}

// 显示进程和Core进程通过本地UDP通信，端口在配置中指定
pub struct StatusBridge {
    socket: UdpSocket,
    target_addr: String,
    tx: mpsc::Sender<ControlEvent>,
}

impl StatusBridge {
    pub async fn new(config: &StatusConfig, tx: mpsc::Sender<ControlEvent>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("{}:{}", config.local_ip, config.local_port)).await?;
        let target_addr = format!("{}:{}", config.remote_ip, config.remote_port);

        Ok(Self {
            socket,
            target_addr,
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 4096]; // 4KB缓冲区
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            match serde_json::from_slice::<InboundMessage>(&buf[..len]) {
                Ok(InboundMessage::Control { action }) => {
                    log::info!("Control from display: {:?}", action);
                    if self.tx.send(action).await.is_err() {
                        log::info!("Control receiver closed");
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("Ignoring display message: {}", e);
                }
            }
        }
        Ok(())
    }

    pub async fn send(&self, message: &StatusMessage) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.socket.send_to(&payload, &self.target_addr).await?;
        Ok(())
    }
}
