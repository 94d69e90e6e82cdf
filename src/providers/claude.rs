use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};

use super::retry::send_with_retry;
use super::{
    Message, MessagePart, Provider, ProviderFuture, ProviderResponse, ProviderUsage, base_url,
    format_error_parts, split_system,
};
use crate::data::DataAttachment;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    messages: Vec<Message>,
}

impl Claude {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

impl Provider for Claude {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn append_user_data(mut self, data: DataAttachment) -> Self {
        self.messages.push(Message::user_data(data));
        self
    }

    fn generate(self) -> ProviderFuture {
        Box::pin(async move {
            let (system, user_inputs) = split_system(self.messages);
            let content = user_inputs
                .into_iter()
                .flat_map(|message| message.parts)
                .map(content_block)
                .collect::<Vec<_>>();

            let body = json!({
                "model": self.model,
                "max_tokens": MAX_TOKENS,
                "messages": [{"role": "user", "content": content}],
                "system": if system.trim().is_empty() { Value::Null } else { json!(system) },
            });

            let client = reqwest::Client::new();
            let url = base_url("ANTHROPIC_BASE_URL", DEFAULT_BASE_URL);
            let reply = send_with_retry("Claude", || {
                client
                    .post(&url)
                    .header("x-api-key", self.key.clone())
                    .header("anthropic-version", "2023-06-01")
                    .json(&body)
            })
            .await?;
            if !reply.status.is_success() {
                return Err(anyhow!(
                    "Claude API error ({}): {}",
                    reply.status,
                    extract_claude_error(&reply.body).unwrap_or(reply.body)
                ));
            }
            extract_text_response(&reply.body, &self.model)
        })
    }
}

fn content_block(part: MessagePart) -> Value {
    match part {
        MessagePart::Text(text) => json!({"type": "text", "text": text}),
        MessagePart::Data(data) => {
            let kind = if data.is_image() { "image" } else { "document" };
            json!({
                "type": kind,
                "source": {
                    "type": "base64",
                    "media_type": data.mime,
                    "data": BASE64.encode(&data.bytes)
                }
            })
        }
    }
}

fn extract_text_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: ClaudeResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Claude response JSON: {}", err))?;
    let output = payload
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if output.trim().is_empty() {
        return Err(anyhow!("Claude returned an empty response"));
    }
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(input, output)| input + output),
    });
    Ok(ProviderResponse {
        text: output,
        model,
        usage,
    })
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ClaudeContent>,
    model: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}
