use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use tracing::debug;

use super::files::{FileClient, RemoteFile, wait_until_active};
use super::retry::send_with_retry;
use super::{
    Message, MessagePart, Provider, ProviderFuture, ProviderResponse, ProviderUsage, base_url,
    format_error_parts, split_system,
};
use crate::data::DataAttachment;
use crate::settings::UploadSettings;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub(crate) const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    messages: Vec<Message>,
    upload: UploadSettings,
}

impl Gemini {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
            upload: UploadSettings::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_upload_settings(mut self, upload: UploadSettings) -> Self {
        self.upload = upload;
        self
    }
}

impl Provider for Gemini {
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
            let base = base_url("GEMINI_BASE_URL", DEFAULT_BASE_URL);
            let files = FileClient::new(self.key.clone(), base.clone());
            let (system_instruction, user_inputs) = split_system(self.messages);

            let (parts, uploaded) = stage_parts(
                user_inputs
                    .into_iter()
                    .flat_map(|message| message.parts)
                    .collect(),
                self.upload.inline_limit_bytes,
                |data| {
                    let (files, upload) = (&files, &self.upload);
                    async move { upload_and_wait(files, &data, upload).await }
                },
                |name| {
                    let files = &files;
                    async move { files.delete(&name).await }
                },
            )
            .await?;

            let body = json!({
                "contents": [{"role": "user", "parts": parts}],
                "systemInstruction": if system_instruction.trim().is_empty() {
                    Value::Null
                } else {
                    json!({"parts": [{"text": system_instruction}]})
                },
            });

            let client = reqwest::Client::new();
            let url = format!("{}/v1beta/models/{}:generateContent", base, self.model);
            let reply = send_with_retry("Gemini", || {
                client
                    .post(&url)
                    .header("x-goog-api-key", self.key.clone())
                    .json(&body)
            })
            .await;

            for name in &uploaded {
                files.delete(name).await;
            }

            let reply = reply?;
            if !reply.status.is_success() {
                return Err(anyhow!(
                    "Gemini API error ({}): {}",
                    reply.status,
                    extract_gemini_error(&reply.body).unwrap_or(reply.body)
                ));
            }
            extract_text_response(&reply.body, &self.model)
        })
    }
}

/// Turns message parts into request parts, uploading attachments above
/// `inline_limit`. If an upload fails, files uploaded earlier in the same
/// request are deleted before the error is returned.
async fn stage_parts<U, UFut, D, DFut>(
    parts: Vec<MessagePart>,
    inline_limit: usize,
    mut upload: U,
    mut delete: D,
) -> Result<(Vec<Value>, Vec<String>)>
where
    U: FnMut(DataAttachment) -> UFut,
    UFut: Future<Output = Result<RemoteFile>>,
    D: FnMut(String) -> DFut,
    DFut: Future<Output = ()>,
{
    let mut uploaded: Vec<String> = Vec::new();
    let mut staged = Vec::new();
    for part in parts {
        match part {
            MessagePart::Text(text) => staged.push(json!({"text": text})),
            MessagePart::Data(data) if data.bytes.len() <= inline_limit => {
                staged.push(json!({
                    "inline_data": {
                        "mime_type": data.mime,
                        "data": BASE64.encode(&data.bytes)
                    }
                }));
            }
            MessagePart::Data(data) => {
                let mime = data.mime.clone();
                match upload(data).await {
                    Ok(remote) => {
                        uploaded.push(remote.name.clone());
                        staged.push(json!({
                            "file_data": {
                                "mime_type": mime,
                                "file_uri": remote.uri
                            }
                        }));
                    }
                    Err(err) => {
                        for name in uploaded {
                            delete(name).await;
                        }
                        return Err(err);
                    }
                }
            }
        }
    }
    Ok((staged, uploaded))
}

async fn upload_and_wait(
    files: &FileClient,
    data: &DataAttachment,
    upload: &UploadSettings,
) -> Result<RemoteFile> {
    debug!(
        "{} exceeds inline limit ({} > {} bytes); uploading",
        data.display_name(),
        data.bytes.len(),
        upload.inline_limit_bytes
    );
    let remote = files.upload(data).await?;
    let name = remote.name.clone();
    match wait_until_active(remote, upload.poll_interval, upload.poll_timeout, |name| {
        files.get(name)
    })
    .await
    {
        Ok(active) => Ok(active),
        Err(err) => {
            files.delete(&name).await;
            Err(err)
        }
    }
}

fn extract_text_response(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    if let Some(reason) = payload
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return Err(anyhow!("Gemini blocked the prompt: {}", reason));
    }
    let candidate = payload
        .candidates
        .first()
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;

    let output = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if output.trim().is_empty() {
        let reason = candidate
            .finish_reason
            .as_deref()
            .unwrap_or("no text parts");
        return Err(anyhow!("Gemini returned an empty response ({})", reason));
    }

    let model = payload
        .model_version
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage_metadata.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    });
    Ok(ProviderResponse {
        text: output,
        model,
        usage,
    })
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
