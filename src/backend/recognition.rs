//! Baidu short speech recognition (`vop.baidu.com/server_api`).

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{HttpStage, SpeechRecognizer};
use crate::config::{CaptureConfig, RecognitionConfig};
use crate::error::{PipelineError, Result, Stage};

#[derive(Debug, Serialize)]
struct RecognitionRequest<'a> {
    format: &'a str,
    rate: u32,
    channel: u8,
    token: &'a str,
    cuid: &'a str,
    /// base64 of the raw capture
    speech: String,
    /// raw byte length, before base64
    len: usize,
}

/// Fields are kept loose: a wrongly typed field is a recognition failure, not
/// an unreadable reply.
#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    #[serde(default)]
    err_no: Option<Value>,
    #[serde(default)]
    err_msg: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
}

pub struct BaiduRecognizer {
    http: HttpStage,
    url: String,
    token: String,
    cuid: String,
    format: String,
    rate: u32,
    channel: u8,
    response_capacity: usize,
}

impl BaiduRecognizer {
    pub fn new(config: &RecognitionConfig, capture: &CaptureConfig, cuid: &str) -> Result<Self> {
        Ok(Self {
            http: HttpStage::new(Stage::Recognize, config.timeout())?,
            url: config.url.clone(),
            token: config.token.clone(),
            cuid: cuid.to_string(),
            format: capture.format.clone(),
            rate: capture.sample_rate,
            channel: capture.channels,
            response_capacity: config.response_buffer_size,
        })
    }
}

#[async_trait]
impl SpeechRecognizer for BaiduRecognizer {
    async fn recognize(&self, speech: &[u8]) -> Result<String> {
        let request = RecognitionRequest {
            format: &self.format,
            rate: self.rate,
            channel: self.channel,
            token: &self.token,
            cuid: &self.cuid,
            speech: STANDARD.encode(speech),
            len: speech.len(),
        };
        log::info!("Recognizing {} bytes of speech", speech.len());

        self.http
            .bounded(async {
                let response = self.http.post_json(&self.url, None, &[], &request).await?;
                let body = self.http.read_bounded(response, self.response_capacity).await?;
                parse_recognition(body.as_bytes())
            })
            .await
    }
}

/// Extract the first transcript from a recognition reply.
pub(crate) fn parse_recognition(body: &[u8]) -> Result<String> {
    let response: RecognitionResponse = serde_json::from_slice(body).map_err(|e| PipelineError::ProtocolError {
        stage: Stage::Recognize,
        message: format!("invalid JSON: {}", e),
    })?;

    if let Some(err_no) = response.err_no.as_ref().filter(|v| !is_success_code(v)) {
        let err_msg = match &response.err_msg {
            Some(Value::String(msg)) => msg.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        return Err(PipelineError::RecognitionError(format!(
            "err_no {}: {}",
            err_no, err_msg
        )));
    }

    let results = match response.result {
        None | Some(Value::Null) => {
            return Err(PipelineError::RecognitionError("missing result".to_string()));
        }
        Some(Value::Array(results)) => results,
        Some(other) => {
            return Err(PipelineError::RecognitionError(format!(
                "result is not an array: {}",
                other
            )));
        }
    };

    match results.into_iter().next() {
        None => Err(PipelineError::RecognitionError("empty result".to_string())),
        Some(Value::String(text)) => Ok(text),
        Some(other) => Err(PipelineError::RecognitionError(format!(
            "result is not text: {}",
            other
        ))),
    }
}

/// `err_no` is 0 on success; some gateways send it as a string.
fn is_success_code(err_no: &Value) -> bool {
    match err_no {
        Value::Null => true,
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s.trim().parse::<i64>() == Ok(0),
        _ => false,
    }
}
