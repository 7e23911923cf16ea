//! Remote backends the pipeline talks to.
//!
//! Each stage is a trait so the orchestrator can be driven by the real HTTP
//! clients or by stand-ins. The HTTP implementations share [`HttpStage`], which
//! adds the stage timeout and maps transport and status failures onto
//! [`PipelineError`].

mod generation;
mod recognition;
mod synthesis;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use serde::Serialize;

use crate::accumulator::Accumulator;
use crate::error::{PipelineError, Result, Stage};

pub use generation::MiniMaxGenerator;
pub use recognition::BaiduRecognizer;
pub use synthesis::MiniMaxSynthesizer;

/// Most of an error body kept for the log message.
const ERROR_BODY_PREFIX: usize = 512;
/// How long to wait for that prefix before reporting the status alone.
const ERROR_BODY_WAIT: Duration = Duration::from_millis(500);

/// Body bytes as they come off the connection.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// How the synthesis body is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// A sequence of `data: {...}\n` frames
    EventStream,
    /// One JSON document for the whole reply
    Document,
}

pub struct SynthesisBody {
    pub stream: ByteStream,
    pub framing: Framing,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Turn one utterance of captured audio into text.
    async fn recognize(&self, speech: &[u8]) -> Result<String>;
}

#[async_trait]
pub trait ChatGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> Result<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesis of `text`; the body is consumed by the stream receiver.
    async fn synthesize(&self, text: &str) -> Result<SynthesisBody>;
}

/// HTTP plumbing shared by the three backends.
pub(crate) struct HttpStage {
    client: Client,
    stage: Stage,
    timeout: Duration,
}

impl HttpStage {
    pub(crate) fn new(stage: Stage, timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            stage,
            timeout,
        })
    }

    /// Run `fut` under this stage's deadline.
    pub(crate) async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: self.stage,
                after: self.timeout,
            })?
    }

    /// POST a JSON body and return the response once its status is known good.
    pub(crate) async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, &str)],
        body: &T,
    ) -> Result<Response> {
        let mut request = self.client.post(url).query(query).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body_prefix(response).await;
            return Err(PipelineError::ProtocolError {
                stage: self.stage,
                message: format!("HTTP {}: {}", status, truncate(&body, 200)),
            });
        }
        Ok(response)
    }

    /// Read a whole (non-streamed) response into a fresh accumulator.
    pub(crate) async fn read_bounded(&self, response: Response, capacity: usize) -> Result<Accumulator> {
        let mut acc = Accumulator::with_capacity(capacity)?;
        let mut stream = body_stream(response);
        while let Some(chunk) = stream.try_next().await? {
            acc.append(&chunk)?;
        }
        log::debug!("{} response: {}/{} bytes", self.stage, acc.len(), acc.capacity());
        Ok(acc)
    }
}

pub(crate) fn body_stream(response: Response) -> ByteStream {
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(PipelineError::from))
        .boxed()
}

/// Read the first few hundred bytes of an error body and drop the rest.
async fn error_body_prefix(response: Response) -> String {
    let mut prefix = Vec::with_capacity(ERROR_BODY_PREFIX);
    let mut stream = body_stream(response);
    let read = async {
        while prefix.len() < ERROR_BODY_PREFIX {
            let Some(Ok(chunk)) = stream.next().await else {
                break;
            };
            let take = chunk.len().min(ERROR_BODY_PREFIX - prefix.len());
            prefix.extend_from_slice(&chunk[..take]);
        }
    };
    let _ = tokio::time::timeout(ERROR_BODY_WAIT, read).await;
    String::from_utf8_lossy(&prefix).into_owned()
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
