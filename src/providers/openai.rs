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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    messages: Vec<Message>,
}

impl OpenAI {
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

impl Provider for OpenAI {
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
            let mut messages = Vec::new();
            if !system.trim().is_empty() {
                messages.push(json!({"role": "system", "content": system}));
            }
            let content = user_inputs
                .into_iter()
                .flat_map(|message| message.parts)
                .map(content_part)
                .collect::<Vec<_>>();
            messages.push(json!({"role": "user", "content": content}));

            let body = json!({
                "model": self.model,
                "messages": messages,
            });

            let client = reqwest::Client::new();
            let url = format!(
                "{}/chat/completions",
                base_url("OPENAI_BASE_URL", DEFAULT_BASE_URL)
            );
            let reply = send_with_retry("OpenAI", || {
                client.post(&url).bearer_auth(&self.key).json(&body)
            })
            .await?;
            if !reply.status.is_success() {
                return Err(anyhow!(
                    "OpenAI API error ({}): {}",
                    reply.status,
                    extract_openai_error(&reply.body).unwrap_or(reply.body)
                ));
            }
            extract_text_response(&reply.body, &self.model)
        })
    }
}

fn content_part(part: MessagePart) -> Value {
    match part {
        MessagePart::Text(text) => json!({"type": "text", "text": text}),
        MessagePart::Data(data) => {
            let uri = format!("data:{};base64,{}", data.mime, BASE64.encode(&data.bytes));
            if data.is_image() {
                json!({"type": "image_url", "image_url": {"url": uri}})
            } else {
                json!({
                    "type": "file",
                    "file": {"filename": data.display_name(), "file_data": uri}
                })
            }
        }
    }
}

fn extract_text_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: OpenAIResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse OpenAI response JSON: {}", err))?;
    let choice = payload
        .choices
        .first()
        .ok_or_else(|| anyhow!("no choices returned from OpenAI"))?;
    if let Some(refusal) = choice.message.refusal.as_deref()
        && !refusal.trim().is_empty()
    {
        return Err(anyhow!("OpenAI refused the request: {}", refusal));
    }
    let output = choice.message.content.clone().unwrap_or_default();
    if output.trim().is_empty() {
        return Err(anyhow!("OpenAI returned an empty response"));
    }
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: output,
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<Value>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let code = error.code.and_then(|value| match value {
        Value::String(code) => Some(code),
        Value::Null => None,
        other => Some(other.to_string()),
    });
    Some(format_error_parts(error.message, error.kind, code))
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    model: Option<String>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
