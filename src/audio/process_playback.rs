//! Playback through an external player process fed on stdin.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use super::{AudioFormat, PlaybackBackend};

/// Pipes encoded audio into a player such as `mpg123 -q -`.
///
/// Arguments may contain `{rate}`, `{channels}` and `{bits}`, which are filled
/// in from the session format when the player is started.
pub struct ProcessPlayback {
    command: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    muted: bool,
}

impl ProcessPlayback {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            child: None,
            stdin: None,
            muted: false,
        }
    }

    fn expand_args(&self, format: &AudioFormat) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{rate}", &format.sample_rate.to_string())
                    .replace("{channels}", &format.channels.to_string())
                    .replace("{bits}", &format.bits_per_sample.to_string())
            })
            .collect()
    }

    async fn kill_player(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                log::debug!("Player already exited: {}", e);
            }
        }
    }
}

#[async_trait]
impl PlaybackBackend for ProcessPlayback {
    async fn configure(&mut self, format: &AudioFormat) -> Result<()> {
        self.kill_player().await;

        let args = self.expand_args(format);
        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start player '{}'", self.command))?;

        self.stdin = child.stdin.take();
        self.child = Some(child);
        log::info!(
            "Player started: {} {:?} ({} Hz, {} ch, {})",
            self.command,
            args,
            format.sample_rate,
            format.channels,
            format.encoding
        );
        Ok(())
    }

    async fn set_mute(&mut self, mute: bool) -> Result<()> {
        // an external player has no mixer; muted writes are discarded
        self.muted = mute;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.muted {
            log::debug!("Player muted, discarding {} bytes", data.len());
            return Ok(());
        }
        let stdin = self
            .stdin
            .as_mut()
            .context("Player not configured")?;
        stdin
            .write_all(data)
            .await
            .context("Failed to write audio to player")?;
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        // closing stdin tells the player the stream is complete
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await.ok();
        }
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await.context("Failed to wait for player")?;
            if !status.success() {
                anyhow::bail!("Player exited with {}", status);
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.kill_player().await;
        Ok(())
    }
}
