use crate::accumulator::Accumulator;
use crate::config::CaptureConfig;
use crate::error::PipelineError;
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub enum CaptureEvent {
    /// One complete utterance of raw PCM
    Utterance(Vec<u8>),
    /// The utterance outgrew the capture buffer and was discarded
    Dropped(PipelineError),
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum UtteranceState {
    Start,
    End,
    Abort,
}

// 录音进程发来的控制消息: {"type":"utterance","state":"start|end|abort"}
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CaptureControl {
    Utterance { state: UtteranceState },
}

/// Collects PCM datagrams between `start` and `end` into one bounded buffer.
pub struct UtteranceAssembler {
    buffer: Accumulator,
    active: bool,
    overflow: Option<PipelineError>,
}

impl UtteranceAssembler {
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        Ok(Self {
            buffer: Accumulator::with_capacity(capacity)?,
            active: false,
            overflow: None,
        })
    }

    /// Feed one datagram; returns an event when an utterance is closed.
    pub fn on_datagram(&mut self, data: &[u8]) -> Option<CaptureEvent> {
        if data.first() == Some(&b'{') {
            if let Ok(CaptureControl::Utterance { state }) = serde_json::from_slice(data) {
                return self.on_control(state);
            }
        }

        if !self.active {
            log::debug!("Ignoring {} bytes of audio outside an utterance", data.len());
            return None;
        }
        if self.overflow.is_some() {
            return None;
        }
        if let Err(e) = self.buffer.append(data) {
            log::warn!("Utterance too long: {}", e);
            self.overflow = Some(e);
        }
        None
    }

    fn on_control(&mut self, state: UtteranceState) -> Option<CaptureEvent> {
        match state {
            UtteranceState::Start => {
                if self.active {
                    log::warn!("Utterance restarted, dropping {} bytes", self.buffer.len());
                }
                self.buffer.reset();
                self.overflow = None;
                self.active = true;
                None
            }
            UtteranceState::Abort => {
                self.buffer.reset();
                self.overflow = None;
                self.active = false;
                None
            }
            UtteranceState::End => {
                if !self.active {
                    return None;
                }
                self.active = false;
                if let Some(e) = self.overflow.take() {
                    self.buffer.reset();
                    return Some(CaptureEvent::Dropped(e));
                }
                if self.buffer.is_empty() {
                    log::info!("Empty utterance ignored");
                    return None;
                }
                let speech = self.buffer.as_bytes().to_vec();
                self.buffer.reset();
                Some(CaptureEvent::Utterance(speech))
            }
        }
    }
}

// 录音进程和Core进程通过本地UDP通信
pub struct CaptureBridge {
    socket: UdpSocket,
    max_utterance_bytes: usize,
    tx: mpsc::Sender<CaptureEvent>,
}

impl CaptureBridge {
    pub async fn new(config: &CaptureConfig, tx: mpsc::Sender<CaptureEvent>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("{}:{}", config.local_ip, config.local_port)).await?;
        Ok(Self {
            socket,
            max_utterance_bytes: config.max_utterance_bytes,
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut assembler = UtteranceAssembler::new(self.max_utterance_bytes)?;
        let mut buf = vec![0u8; 65536]; // 一个UDP包的最大长度
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            if let Some(event) = assembler.on_datagram(&buf[..len]) {
                if self.tx.send(event).await.is_err() {
                    log::info!("Capture receiver closed");
                    break;
                }
            }
        }
        Ok(())
    }
}
