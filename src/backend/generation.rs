//! MiniMax chat completion (`chatcompletion_pro`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatGenerator, HttpStage};
use crate::config::GenerationConfig;
use crate::error::{PipelineError, Result, Stage};
use crate::frame_decoder::BaseResp;

const SENDER_TYPE_USER: &str = "USER";
const SENDER_TYPE_BOT: &str = "BOT";

#[derive(Debug, Serialize)]
struct BotSetting<'a> {
    bot_name: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    sender_type: &'a str,
    sender_name: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplyConstraints<'a> {
    sender_type: &'a str,
    sender_name: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    bot_setting: Vec<BotSetting<'a>>,
    messages: Vec<Message<'a>>,
    reply_constraints: ReplyConstraints<'a>,
    model: &'a str,
    tokens_to_generate: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    reply: Option<Value>,
    #[serde(default)]
    base_resp: Option<BaseResp>,
}

pub struct MiniMaxGenerator {
    http: HttpStage,
    config: GenerationConfig,
    sender_name: String,
}

impl MiniMaxGenerator {
    pub fn new(config: &GenerationConfig, sender_name: &str) -> Result<Self> {
        Ok(Self {
            http: HttpStage::new(Stage::Generate, config.timeout())?,
            config: config.clone(),
            sender_name: sender_name.to_string(),
        })
    }

    fn request<'a>(&'a self, text: &'a str) -> GenerationRequest<'a> {
        GenerationRequest {
            bot_setting: vec![BotSetting {
                bot_name: &self.config.bot_name,
                content: &self.config.persona,
            }],
            messages: vec![Message {
                sender_type: SENDER_TYPE_USER,
                sender_name: &self.sender_name,
                text,
            }],
            reply_constraints: ReplyConstraints {
                sender_type: SENDER_TYPE_BOT,
                sender_name: &self.config.bot_name,
            },
            model: &self.config.model,
            tokens_to_generate: self.config.tokens_to_generate,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
        }
    }
}

#[async_trait]
impl ChatGenerator for MiniMaxGenerator {
    async fn generate(&self, text: &str) -> Result<String> {
        let request = self.request(text);
        log::info!("Generating reply for {} chars", text.chars().count());

        self.http
            .bounded(async {
                let response = self
                    .http
                    .post_json(
                        &self.config.url,
                        Some(self.config.api_key.as_str()),
                        &[("GroupId", self.config.group_id.as_str())],
                        &request,
                    )
                    .await?;
                let body = self
                    .http
                    .read_bounded(response, self.config.response_buffer_size)
                    .await?;
                parse_generation(body.as_bytes())
            })
            .await
    }
}

/// Extract the reply text from a chat completion.
pub(crate) fn parse_generation(body: &[u8]) -> Result<String> {
    let response: GenerationResponse = serde_json::from_slice(body).map_err(|e| PipelineError::ProtocolError {
        stage: Stage::Generate,
        message: format!("invalid JSON: {}", e),
    })?;

    let status = response.base_resp.unwrap_or_default();
    match response.reply {
        Some(Value::String(reply)) => Ok(reply),
        _ if status.status_code != 0 => Err(PipelineError::GenerationError(format!(
            "status {}: {}",
            status.status_code, status.status_msg
        ))),
        None | Some(Value::Null) => Err(PipelineError::GenerationError("missing reply".to_string())),
        Some(other) => Err(PipelineError::GenerationError(format!(
            "reply is not text: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> MiniMaxGenerator {
        let config = crate::config::Config::new().unwrap();
        MiniMaxGenerator::new(&config.generation, "ESP-BOX-3").unwrap()
    }

    #[test]
    fn test_reply_is_extracted() {
        let reply = parse_generation(
            br#"{"reply":"hi there","choices":[],"base_resp":{"status_code":0,"status_msg":""}}"#,
        )
        .unwrap();
        assert_eq!(reply, "hi there");
    }

    #[test]
    fn test_missing_reply_is_generation_error() {
        assert!(matches!(
            parse_generation(br#"{"choices":[]}"#).unwrap_err(),
            PipelineError::GenerationError(_)
        ));
        assert!(matches!(
            parse_generation(br#"{"reply":7}"#).unwrap_err(),
            PipelineError::GenerationError(_)
        ));
    }

    #[test]
    fn test_status_is_surfaced() {
        let reply = parse_generation(br#"{"reply":"","base_resp":{"status_code":1008,"status_msg":"insufficient balance"}}"#);
        // a string reply wins over the status block
        assert_eq!(reply.unwrap(), "");

        let err = parse_generation(br#"{"base_resp":{"status_code":1008,"status_msg":"insufficient balance"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("insufficient balance"));
    }

    #[test]
    fn test_request_wire_format() {
        let generator = generator();
        let json = serde_json::to_value(generator.request("hello")).unwrap();

        assert_eq!(json["messages"][0]["sender_type"], "USER");
        assert_eq!(json["messages"][0]["sender_name"], "ESP-BOX-3");
        assert_eq!(json["messages"][0]["text"], "hello");
        assert_eq!(json["reply_constraints"]["sender_type"], "BOT");
        assert_eq!(json["reply_constraints"]["sender_name"], json["bot_setting"][0]["bot_name"]);
        assert!(json["bot_setting"][0]["content"].is_string());
        assert!(json["tokens_to_generate"].is_u64());
        assert!(json.get("model").is_some());
    }
}
