use anyhow::{Result, anyhow};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::data::DataAttachment;
use crate::settings::UploadSettings;

mod claude;
pub mod files;
mod gemini;
mod openai;
mod retry;

pub use claude::Claude;
pub use gemini::Gemini;
pub use openai::OpenAI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Gemini,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => openai::DEFAULT_MODEL,
            ProviderKind::Gemini => gemini::DEFAULT_MODEL,
            ProviderKind::Claude => claude::DEFAULT_MODEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested_model: Option<String>,
}

impl ProviderSelection {
    pub fn model(&self) -> String {
        self.requested_model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Copy)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Data(DataAttachment),
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user_data(data: DataAttachment) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Data(data)],
        }
    }
}

/// Splits messages into the joined system prompt and the user messages.
pub(crate) fn split_system(messages: Vec<Message>) -> (String, Vec<Message>) {
    let (system_inputs, user_inputs): (Vec<Message>, Vec<Message>) = messages
        .into_iter()
        .partition(|message| matches!(message.role, MessageRole::System));
    let system = system_inputs
        .into_iter()
        .flat_map(|message| message.parts)
        .filter_map(|part| match part {
            MessagePart::Text(text) => Some(text),
            MessagePart::Data(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    (system, user_inputs)
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

pub trait Provider: Clone + Send + Sync {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn append_user_data(self, data: DataAttachment) -> Self;
    fn generate(self) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Gemini(Gemini),
    Claude(Claude),
}

impl Provider for ProviderImpl {
    fn append_system_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_system_input(input))
            }
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_system_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_system_input(input))
            }
        }
    }

    fn append_user_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_input(input))
            }
            ProviderImpl::Gemini(provider) => {
                ProviderImpl::Gemini(provider.append_user_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_user_input(input))
            }
        }
    }

    fn append_user_data(self, data: DataAttachment) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => ProviderImpl::OpenAI(provider.append_user_data(data)),
            ProviderImpl::Gemini(provider) => ProviderImpl::Gemini(provider.append_user_data(data)),
            ProviderImpl::Claude(provider) => ProviderImpl::Claude(provider.append_user_data(data)),
        }
    }

    fn generate(self) -> ProviderFuture {
        match self {
            ProviderImpl::OpenAI(provider) => provider.generate(),
            ProviderImpl::Gemini(provider) => provider.generate(),
            ProviderImpl::Claude(provider) => provider.generate(),
        }
    }
}

pub fn build_provider(
    selection: &ProviderSelection,
    key: String,
    upload: &UploadSettings,
) -> ProviderImpl {
    let model = selection.model();
    match selection.provider {
        ProviderKind::OpenAI => ProviderImpl::OpenAI(OpenAI::new(key).with_model(model)),
        ProviderKind::Gemini => ProviderImpl::Gemini(
            Gemini::new(key)
                .with_model(model)
                .with_upload_settings(upload.clone()),
        ),
        ProviderKind::Claude => ProviderImpl::Claude(Claude::new(key).with_model(model)),
    }
}

/// Picks the provider from the explicit model argument, then the settings
/// default, then whichever API key is present in the environment.
pub fn resolve_provider_selection(
    model_arg: Option<&str>,
    settings_default: Option<&str>,
    override_key: Option<&str>,
) -> Result<ProviderSelection> {
    match model_arg.or(settings_default) {
        Some(model) => parse_model_arg(model),
        None => default_provider_selection(override_key),
    }
}

pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key.filter(|value| !value.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }

    match provider {
        ProviderKind::OpenAI => get_env("OPENAI_API_KEY"),
        ProviderKind::Gemini => get_env("GEMINI_API_KEY").or_else(|| get_env("GOOGLE_API_KEY")),
        ProviderKind::Claude => get_env("ANTHROPIC_API_KEY"),
    }
    .ok_or_else(|| {
        anyhow!(
            "API key not found for provider {} (pass --key or set {})",
            provider.as_str(),
            key_env_hint(provider)
        )
    })
}

fn key_env_hint(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAI => "OPENAI_API_KEY",
        ProviderKind::Gemini => "GEMINI_API_KEY/GOOGLE_API_KEY",
        ProviderKind::Claude => "ANTHROPIC_API_KEY",
    }
}

fn default_provider_selection(override_key: Option<&str>) -> Result<ProviderSelection> {
    let provider = if get_env("GEMINI_API_KEY").is_some() || get_env("GOOGLE_API_KEY").is_some() {
        Some(ProviderKind::Gemini)
    } else if get_env("OPENAI_API_KEY").is_some() {
        Some(ProviderKind::OpenAI)
    } else if get_env("ANTHROPIC_API_KEY").is_some() {
        Some(ProviderKind::Claude)
    } else if override_key.is_some() {
        Some(ProviderKind::Gemini)
    } else {
        None
    };

    provider
        .map(|provider| ProviderSelection {
            provider,
            requested_model: None,
        })
        .ok_or_else(|| {
            anyhow!(
                "no API keys found (checked GEMINI_API_KEY/GOOGLE_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY)"
            )
        })
}

fn parse_model_arg(model_arg: &str) -> Result<ProviderSelection> {
    let raw = model_arg.trim();
    if raw.is_empty() {
        return Err(anyhow!("model argument is empty"));
    }

    if let Some(provider) = provider_from_name(&raw.to_lowercase()) {
        return Ok(ProviderSelection {
            provider,
            requested_model: None,
        });
    }

    if let Some((provider, model)) = parse_provider_model_pair(raw) {
        return Ok(ProviderSelection {
            provider,
            requested_model: model,
        });
    }

    if raw.to_lowercase().starts_with("gemini") {
        return Ok(ProviderSelection {
            provider: ProviderKind::Gemini,
            requested_model: Some(raw.to_string()),
        });
    }

    Err(anyhow!(
        "unable to infer provider from model '{}'. Use provider:model (gemini:, openai:, claude:)",
        raw
    ))
}

fn parse_provider_model_pair(input: &str) -> Option<(ProviderKind, Option<String>)> {
    let (provider_part, model_part) = input.split_once(':')?;
    let provider = provider_from_name(&provider_part.trim().to_lowercase())?;
    let model = Some(model_part.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string());
    Some((provider, model))
}

fn provider_from_name(name: &str) -> Option<ProviderKind> {
    match name {
        "openai" => Some(ProviderKind::OpenAI),
        "gemini" | "google" => Some(ProviderKind::Gemini),
        "claude" | "anthropic" => Some(ProviderKind::Claude),
        _ => None,
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let mut parts = Vec::new();
    if let Some(message) = message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if let Some(code) = code
        && !code.trim().is_empty()
    {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}

pub(crate) fn base_url(env_key: &str, default: &str) -> String {
    get_env(env_key)
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_argument_forms() {
        let selection = resolve_provider_selection(Some("claude"), None, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Claude);
        assert_eq!(selection.requested_model, None);
        assert_eq!(selection.model(), claude::DEFAULT_MODEL);

        let selection = resolve_provider_selection(Some("openai:gpt-4o"), None, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::OpenAI);
        assert_eq!(selection.model(), "gpt-4o");

        let selection = resolve_provider_selection(Some("gemini-2.0-flash"), None, None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Gemini);
        assert_eq!(selection.model(), "gemini-2.0-flash");

        assert!(resolve_provider_selection(Some("llama3"), None, None).is_err());
        assert!(resolve_provider_selection(Some("   "), None, None).is_err());
    }

    #[test]
    fn explicit_model_wins_over_settings_default() {
        let selection =
            resolve_provider_selection(Some("openai"), Some("gemini:gemini-1.5-flash"), None)
                .unwrap();
        assert_eq!(selection.provider, ProviderKind::OpenAI);

        let selection =
            resolve_provider_selection(None, Some("google:gemini-1.5-pro"), None).unwrap();
        assert_eq!(selection.provider, ProviderKind::Gemini);
        assert_eq!(selection.model(), "gemini-1.5-pro");
    }

    #[test]
    fn override_key_is_trimmed_and_blank_is_ignored() {
        assert_eq!(
            resolve_key(ProviderKind::Gemini, Some("  abc  ")).unwrap(),
            "abc"
        );
    }

    #[test]
    fn error_parts_are_joined() {
        assert_eq!(
            format_error_parts(Some("bad".into()), Some("INVALID".into()), Some("400".into())),
            "bad | type: INVALID | code: 400"
        );
        assert_eq!(format_error_parts(None, Some(" ".into()), None), "unknown error");
    }
}
