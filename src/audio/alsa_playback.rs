//! ALSA playback backend.
//!
//! Samples are written from a dedicated OS thread (not a tokio task) fed by a
//! bounded channel, the same split the capture side of the device uses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::alsa_device;
use super::stream_decoder::{PcmDecoder, StreamDecoder};
use super::{AudioEncoding, AudioFormat, PlaybackBackend};

const PLAY_QUEUE_DEPTH: usize = 64;
const MAX_RECOVERY_RETRIES: u32 = 3;

struct PlayThread {
    tx: mpsc::Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct AlsaPlayback {
    device: String,
    mixer_card: String,
    mixer_control: String,
    volume: u8,
    thread: Option<PlayThread>,
}

impl AlsaPlayback {
    pub fn new(device: String, mixer_card: String, mixer_control: String, volume: u8) -> Self {
        Self {
            device,
            mixer_card,
            mixer_control,
            volume,
            thread: None,
        }
    }

    async fn join(&mut self, discard: bool) -> Result<()> {
        if let Some(PlayThread { tx, running, handle }) = self.thread.take() {
            if discard {
                running.store(false, Ordering::Relaxed);
            }
            drop(tx);
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .context("Failed to join playback thread")?
                .map_err(|_| anyhow::anyhow!("Playback thread panicked"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PlaybackBackend for AlsaPlayback {
    async fn configure(&mut self, format: &AudioFormat) -> Result<()> {
        if format.encoding != AudioEncoding::Pcm || format.bits_per_sample != 16 {
            anyhow::bail!(
                "ALSA backend plays 16-bit pcm only, synthesis is set to {}",
                format.encoding
            );
        }
        self.join(true).await?;

        let (tx, rx) = mpsc::channel(PLAY_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));
        let device = self.device.clone();
        let format = *format;

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(&device, format, rx, &running, ready_tx) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };
        self.thread = Some(PlayThread { tx, running, handle });

        ready_rx
            .await
            .context("Playback thread exited before opening the device")??;
        Ok(())
    }

    async fn set_mute(&mut self, mute: bool) -> Result<()> {
        let card = self.mixer_card.clone();
        let control = self.mixer_control.clone();
        let volume = self.volume;
        tokio::task::spawn_blocking(move || alsa_device::set_mixer_mute(&card, &control, mute, volume))
            .await
            .context("Mixer task failed")?
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let thread = self.thread.as_ref().context("ALSA playback not configured")?;
        thread
            .tx
            .send(data.to_vec())
            .await
            .map_err(|_| anyhow::anyhow!("Playback thread stopped"))
    }

    async fn drain(&mut self) -> Result<()> {
        self.join(false).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.join(true).await
    }
}

fn play_thread(
    device: &str,
    format: AudioFormat,
    mut rx: mpsc::Receiver<Vec<u8>>,
    running: &AtomicBool,
    ready: oneshot::Sender<Result<()>>,
) -> Result<()> {
    let (pcm, params) = match alsa_device::open_playback(device, format.sample_rate, format.channels as u32) {
        Ok(opened) => {
            let _ = ready.send(Ok(()));
            opened
        }
        Err(e) => {
            let message = format!("{:#}", e);
            let _ = ready.send(Err(e));
            anyhow::bail!(message);
        }
    };

    let channels = params.channels as usize;
    let io = pcm.io_i16()?;
    let mut decoder = PcmDecoder::new();

    while running.load(Ordering::Relaxed) {
        let Some(data) = rx.blocking_recv() else {
            break;
        };
        let samples = decoder.decode(&data)?;
        if samples.is_empty() {
            continue;
        }

        // Short writes and XRUNs are retried without losing frames
        let total_frames = samples.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames && running.load(Ordering::Relaxed) {
            let offset = frames_written * channels;
            match io.writei(&samples[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break;
                    }
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    if running.load(Ordering::Relaxed) {
        // let queued samples reach the speaker
        if let Err(e) = pcm.drain() {
            log::warn!("PCM drain failed: {}", e);
        }
    } else if let Err(e) = pcm.drop() {
        log::warn!("PCM drop failed: {}", e);
    }
    log::info!("Playback stopped");
    Ok(())
}
