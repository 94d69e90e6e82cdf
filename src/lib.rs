use anyhow::{Context, Result, anyhow};
use std::path::Path;

pub mod data;
pub mod label;
pub mod listing;
pub mod logging;
pub mod ocr;
pub mod parser;
pub mod prompts;
pub mod providers;
pub mod server;
pub mod session;
pub mod settings;
#[cfg(test)]
mod test_util;

pub use label::{LabelRenderer, LabelSpec, RenderedLabel};
pub use listing::{ExecutionOutput, ExtractionOutput, ListingAssistant};
pub use parser::{ExtractionResult, KeywordPair, ParsedListing};
pub use providers::{Claude, Gemini, OpenAI, Provider, ProviderKind, ProviderUsage};

const RAW_NOTICE: &str = "format not recognised; raw model output follows:";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
    pub with_using_tokens: bool,
    pub with_using_model: bool,
}

#[derive(Debug, Clone)]
pub struct KeywordsCommand {
    pub data: String,
    pub data_mime: Option<String>,
    pub ocr: bool,
    pub json: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TranslateCommand {
    pub text: String,
    pub data: Option<String>,
    pub ocr: bool,
}

#[derive(Debug, Clone)]
pub struct LabelCommand {
    pub spec: LabelSpec,
    pub output: String,
    pub pdf: Option<String>,
}

fn load_settings(config: &Config) -> Result<settings::Settings> {
    settings::load_settings(config.settings_path.as_deref().map(Path::new))
}

fn build_assistant(
    config: &Config,
    settings: settings::Settings,
) -> Result<ListingAssistant<providers::ProviderImpl>> {
    let selection = providers::resolve_provider_selection(
        config.model.as_deref(),
        settings.default_model.as_deref(),
        config.key.as_deref(),
    )?;
    let key = providers::resolve_key(selection.provider, config.key.as_deref())
        .with_context(|| "no API key found for selected provider")?;
    let provider = providers::build_provider(&selection, key, &settings.upload);
    Ok(ListingAssistant::new(provider, settings))
}

pub async fn run_keywords(config: Config, command: KeywordsCommand) -> Result<String> {
    let settings = load_settings(&config)?;
    let data = data::load_attachment(Path::new(&command.data), command.data_mime.as_deref())?;
    data::ensure_model_input(&data, true)?;
    let assistant = build_assistant(&config, settings)?;
    let output = assistant
        .extract(listing::ExtractionInput {
            data,
            ocr: command.ocr,
        })
        .await?;
    let text = format_extraction(&output.parsed, command.json)?;
    Ok(append_meta(
        text,
        output.model.as_deref(),
        output.usage.as_ref(),
        &config,
    ))
}

pub async fn run_translate(config: Config, command: TranslateCommand) -> Result<String> {
    let settings = load_settings(&config)?;
    let data = command
        .data
        .as_deref()
        .map(|path| data::load_attachment(Path::new(path), Some("image")))
        .transpose()?;
    if command.text.trim().is_empty() && data.is_none() {
        return Err(anyhow!("nothing to translate: provide text, stdin or --data"));
    }
    let assistant = build_assistant(&config, settings)?;
    let output = assistant
        .localize(listing::LocalizationInput {
            text: command.text,
            data,
            ocr: command.ocr,
        })
        .await?;
    Ok(append_meta(
        output.text,
        output.model.as_deref(),
        output.usage.as_ref(),
        &config,
    ))
}

pub fn run_label(config: Config, command: LabelCommand) -> Result<String> {
    let settings = load_settings(&config)?;
    let renderer = LabelRenderer::new(settings.label);
    let label = renderer.render(&command.spec)?;
    std::fs::write(&command.output, &label.png)
        .with_context(|| format!("failed to write label: {}", command.output))?;
    let mut lines = vec![format!(
        "label: {} ({}x{})",
        command.output, label.width, label.height
    )];
    if let Some(pdf_path) = command.pdf.as_deref() {
        let pdf = renderer.render_pdf(&label)?;
        std::fs::write(pdf_path, pdf)
            .with_context(|| format!("failed to write label pdf: {}", pdf_path))?;
        lines.push(format!("pdf: {}", pdf_path));
    }
    Ok(lines.join("\n"))
}

pub async fn run_serve(config: Config, addr: Option<String>) -> Result<()> {
    let settings = load_settings(&config)?;
    let addr = addr
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| settings.server_addr.clone());
    server::run_server(settings, addr).await
}

/// Renders an extraction the way the CLI prints it.
pub fn format_extraction(parsed: &ParsedListing, json: bool) -> Result<String> {
    match parsed {
        ParsedListing::Structured(result) if json => {
            serde_json::to_string_pretty(result).with_context(|| "failed to encode result")
        }
        ParsedListing::Raw { .. } if json => {
            serde_json::to_string_pretty(parsed).with_context(|| "failed to encode result")
        }
        ParsedListing::Structured(result) => {
            let mut sections = Vec::new();
            if !result.keywords.is_empty() {
                sections.push(format!("keywords: {}", result.keywords_line()));
            }
            if !result.internal_name_variants.is_empty() {
                sections.push(bullet_section(
                    "internal names",
                    &result.internal_name_variants,
                ));
            }
            if !result.generated_title_variants.is_empty() {
                sections.push(bullet_section("titles", &result.generated_title_variants));
            }
            Ok(sections.join("\n"))
        }
        ParsedListing::Raw { text } => Ok(format!("{}\n{}", RAW_NOTICE, text)),
    }
}

fn bullet_section(title: &str, items: &[String]) -> String {
    let mut lines = vec![format!("{}:", title)];
    lines.extend(items.iter().map(|item| format!("- {}", item)));
    lines.join("\n")
}

fn append_meta(
    mut output: String,
    model: Option<&str>,
    usage: Option<&ProviderUsage>,
    config: &Config,
) -> String {
    let mut meta_lines = Vec::new();

    if config.with_using_model {
        meta_lines.push(format!("model: {}", model.unwrap_or("unavailable")));
    }

    if config.with_using_tokens {
        meta_lines.push(format_usage(usage));
    }

    if !meta_lines.is_empty() {
        output.push('\n');
        output.push_str(&meta_lines.join("\n"));
    }

    output
}

fn format_usage(usage: Option<&ProviderUsage>) -> String {
    let Some(usage) = usage else {
        return "tokens: unavailable".to_string();
    };
    let total = usage.total_tokens.or_else(|| {
        usage
            .prompt_tokens
            .zip(usage.completion_tokens)
            .map(|(prompt, completion)| prompt + completion)
    });

    let mut parts = Vec::new();
    if let Some(prompt) = usage.prompt_tokens {
        parts.push(format!("prompt={}", prompt));
    }
    if let Some(completion) = usage.completion_tokens {
        parts.push(format!("completion={}", completion));
    }
    if let Some(total) = total {
        parts.push(format!("total={}", total));
    }

    if parts.is_empty() {
        "tokens: unavailable".to_string()
    } else {
        format!("tokens: {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    fn listing() -> ParsedListing {
        parser::parse_extraction(
            r#"{"keywords":[{"source_term":"수납함","translation":"收纳盒"},"정리함"],"internal_name_variants":["收纳盒-灰"],"generated_title_variants":["LxU 접이식 수납함","LxU 대용량 정리함"]}"#,
        )
    }

    #[test]
    fn structured_extraction_prints_sections() {
        let text = format_extraction(&listing(), false).unwrap();
        assert_eq!(
            text,
            "keywords: 수납함 (收纳盒), 정리함\ninternal names:\n- 收纳盒-灰\ntitles:\n- LxU 접이식 수납함\n- LxU 대용량 정리함"
        );
    }

    #[test]
    fn json_output_and_raw_notice() {
        let json = format_extraction(&listing(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["keywords"][0]["translation"], "收纳盒");
        assert!(value.get("kind").is_none());

        let raw = parser::parse_extraction("cannot read");
        assert_eq!(
            format_extraction(&raw, false).unwrap(),
            format!("{}\ncannot read", RAW_NOTICE)
        );
        let value: serde_json::Value =
            serde_json::from_str(&format_extraction(&raw, true).unwrap()).unwrap();
        assert_eq!(value["kind"], "raw");
    }

    #[test]
    fn meta_lines_follow_flags() {
        let config = Config {
            with_using_model: true,
            with_using_tokens: true,
            ..Default::default()
        };
        let usage = ProviderUsage {
            prompt_tokens: Some(10),
            completion_tokens: Some(5),
            total_tokens: None,
        };
        let output = append_meta("done".to_string(), Some("gemini-1.5-flash"), Some(&usage), &config);
        assert_eq!(
            output,
            "done\nmodel: gemini-1.5-flash\ntokens: prompt=10, completion=5, total=15"
        );
        let plain = append_meta("done".to_string(), None, None, &Config::default());
        assert_eq!(plain, "done");
        assert_eq!(format_usage(None), "tokens: unavailable");
    }

    #[test]
    fn label_command_writes_png_and_pdf() {
        with_temp_home(|home| {
            let output = home.join("label.png");
            let pdf = home.join("label.pdf");
            let summary = run_label(
                Config::default(),
                LabelCommand {
                    spec: LabelSpec {
                        sku: "LXU-001".to_string(),
                        title: "LxU 접이식 수납함".to_string(),
                        spec_option: Some("그레이".to_string()),
                    },
                    output: output.display().to_string(),
                    pdf: Some(pdf.display().to_string()),
                },
            )
            .expect("label");
            assert!(summary.contains("(591x236)"));
            let png = std::fs::read(&output).unwrap();
            assert_eq!(&png[1..4], b"PNG");
            let pdf = std::fs::read(&pdf).unwrap();
            assert!(pdf.starts_with(b"%PDF"));
        });
    }

    #[test]
    fn translate_without_input_fails_before_any_request() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = with_temp_home(|_| {
            runtime.block_on(run_translate(Config::default(), TranslateCommand::default()))
        });
        assert!(result.unwrap_err().to_string().contains("nothing to translate"));
    }
}
