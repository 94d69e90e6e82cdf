use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::data::{DataAttachment, ensure_model_input};
use crate::ocr;
use crate::parser::{ParsedListing, parse_extraction, strip_code_fence};
use crate::prompts;
use crate::providers::{Provider, ProviderUsage};
use crate::settings::Settings;

const EXTRACT_FROM_DATA: &str = "Here is the product material.";
const EXTRACT_FROM_OCR: &str = "Text recognised in the product material:";
const LOCALIZE_IMAGE_ONLY: &str = "Translate the copy shown in this image.";

/// Runs the keyword and localization tools against one model provider.
#[derive(Debug, Clone)]
pub struct ListingAssistant<P: Provider> {
    provider: P,
    settings: Settings,
}

#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub data: DataAttachment,
    pub ocr: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub parsed: ParsedListing,
    pub raw: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalizationInput {
    pub text: String,
    pub data: Option<DataAttachment>,
    pub ocr: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

impl<P: Provider> ListingAssistant<P> {
    pub fn new(provider: P, settings: Settings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn extract(&self, input: ExtractionInput) -> Result<ExtractionOutput> {
        ensure_model_input(&input.data, true)?;
        let prompt = prompts::render_keywords_prompt(&self.settings.listing)?;
        let mut provider = self.provider.clone().append_system_input(prompt);

        if input.ocr && input.data.is_image() {
            let text = self.recognise(input.data).await?;
            provider = provider.append_user_input(format!("{}\n{}", EXTRACT_FROM_OCR, text));
        } else {
            if input.ocr {
                warn!("ocr only reads images; sending {} as is", input.data.mime);
            }
            provider = provider
                .append_user_data(input.data)
                .append_user_input(EXTRACT_FROM_DATA.to_string());
        }

        let response = provider.generate().await?;
        let parsed = parse_extraction(&response.text);
        if matches!(parsed, ParsedListing::Raw { .. }) {
            debug!("model output did not match a known listing format");
        }
        Ok(ExtractionOutput {
            parsed,
            raw: response.text,
            model: response.model,
            usage: response.usage,
        })
    }

    pub async fn localize(&self, input: LocalizationInput) -> Result<ExecutionOutput> {
        let mut text = input.text.trim().to_string();
        if text.is_empty() && input.data.is_none() {
            return Err(anyhow!("nothing to translate: provide text or an image"));
        }
        if let Some(data) = input.data.as_ref() {
            ensure_model_input(data, false)?;
        }

        let prompt = prompts::render_localize_prompt(&self.settings.listing)?;
        let mut provider = self.provider.clone().append_system_input(prompt);
        if let Some(data) = input.data {
            if input.ocr {
                let recognised = self.recognise(data).await?;
                text = if text.is_empty() {
                    recognised
                } else {
                    format!("{}\n\n{}", text, recognised)
                };
            } else {
                provider = provider.append_user_data(data);
            }
        }
        if text.is_empty() {
            text = LOCALIZE_IMAGE_ONLY.to_string();
        }

        let response = provider.append_user_input(text).generate().await?;
        Ok(ExecutionOutput {
            text: strip_code_fence(&response.text),
            model: response.model,
            usage: response.usage,
        })
    }

    async fn recognise(&self, data: DataAttachment) -> Result<String> {
        let languages = self.settings.ocr_languages.clone();
        let recognised =
            tokio::task::spawn_blocking(move || ocr::extract_text(&data.bytes, &languages))
                .await
                .with_context(|| "ocr task stopped unexpectedly")??;
        if recognised.is_empty() {
            return Err(anyhow!("no text recognised in the image"));
        }
        Ok(recognised.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PDF_MIME, PNG_MIME};
    use crate::providers::{ProviderFuture, ProviderResponse};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct TestProvider {
        reply: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl TestProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: Arc::default(),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }

        fn record(self, entry: String) -> Self {
            self.seen.lock().unwrap().push(entry);
            self
        }
    }

    impl Provider for TestProvider {
        fn append_system_input(self, input: String) -> Self {
            self.record(format!("system:{}", input))
        }

        fn append_user_input(self, input: String) -> Self {
            self.record(format!("user:{}", input))
        }

        fn append_user_data(self, data: DataAttachment) -> Self {
            self.record(format!("data:{}", data.mime))
        }

        fn generate(self) -> ProviderFuture {
            let text = self.reply;
            Box::pin(async move {
                Ok(ProviderResponse {
                    text,
                    model: Some("test".to_string()),
                    usage: None,
                })
            })
        }
    }

    fn attachment(mime: &str) -> DataAttachment {
        DataAttachment {
            bytes: vec![1, 2, 3],
            mime: mime.to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn extract_sends_prompt_then_data() {
        let provider = TestProvider::replying(
            "```json\n{\"keywords\":[\"수납함\"],\"generated_title_variants\":[\"LxU 수납함\"]}\n```",
        );
        let assistant = ListingAssistant::new(provider.clone(), Settings::default());
        let output = assistant
            .extract(ExtractionInput {
                data: attachment(PDF_MIME),
                ocr: false,
            })
            .await
            .expect("extract");

        let result = output.parsed.structured().expect("structured");
        assert_eq!(result.keywords[0].source_term, "수납함");
        assert_eq!(output.model.as_deref(), Some("test"));
        let seen = provider.seen();
        assert!(seen[0].starts_with("system:") && seen[0].contains("LxU"));
        assert_eq!(seen[1], format!("data:{}", PDF_MIME));
        assert_eq!(seen[2], format!("user:{}", EXTRACT_FROM_DATA));
    }

    #[tokio::test]
    async fn extract_keeps_unrecognised_output_as_raw() {
        let provider = TestProvider::replying("Sorry, the image is too blurry.");
        let assistant = ListingAssistant::new(provider, Settings::default());
        let output = assistant
            .extract(ExtractionInput {
                data: attachment(PNG_MIME),
                ocr: false,
            })
            .await
            .expect("extract");
        assert_eq!(
            output.parsed,
            ParsedListing::Raw {
                text: "Sorry, the image is too blurry.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn extract_rejects_plain_text_uploads() {
        let assistant = ListingAssistant::new(TestProvider::default(), Settings::default());
        let err = assistant
            .extract(ExtractionInput {
                data: attachment("text/plain"),
                ocr: false,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected an image or pdf"));
    }

    #[tokio::test]
    async fn localize_strips_fence_and_requires_input() {
        let provider = TestProvider::replying("```\n지금 바로 만나보세요!\n```");
        let assistant = ListingAssistant::new(provider.clone(), Settings::default());
        let output = assistant
            .localize(LocalizationInput {
                text: "  立即购买  ".to_string(),
                ..Default::default()
            })
            .await
            .expect("localize");
        assert_eq!(output.text, "지금 바로 만나보세요!");
        assert_eq!(provider.seen().last().unwrap(), "user:立即购买");

        let err = assistant
            .localize(LocalizationInput {
                text: " \n".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nothing to translate"));
    }

    #[tokio::test]
    async fn localize_image_only_gets_default_request() {
        let provider = TestProvider::replying("번역");
        let assistant = ListingAssistant::new(provider.clone(), Settings::default());
        assistant
            .localize(LocalizationInput {
                text: String::new(),
                data: Some(attachment(PNG_MIME)),
                ocr: false,
            })
            .await
            .expect("localize");
        let seen = provider.seen();
        assert_eq!(seen[1], format!("data:{}", PNG_MIME));
        assert_eq!(seen[2], format!("user:{}", LOCALIZE_IMAGE_ONLY));

        let err = assistant
            .localize(LocalizationInput {
                text: String::new(),
                data: Some(attachment(PDF_MIME)),
                ocr: false,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected an image"));
    }
}
