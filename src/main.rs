use std::io::{self, IsTerminal, Read};

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "lxu-listing-tools",
    version,
    about = "Marketplace listing helpers: keyword extraction, localization and SKU labels"
)]
struct Cli {
    /// Model name or provider:model (e.g. gemini:gemini-1.5-flash)
    #[arg(short = 'm', long = "model", global = true)]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key", global = true)]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings", global = true)]
    read_settings: Option<String>,

    /// Append token usage to output
    #[arg(long = "with-using-tokens", global = true)]
    with_using_tokens: bool,

    /// Append model name to output
    #[arg(long = "with-using-model", global = true)]
    with_using_model: bool,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract keywords, internal names and titles from a screenshot or PDF
    Keywords {
        /// Product screenshot or PDF
        #[arg(short = 'd', long = "data")]
        data: String,

        /// Mime type for --data (auto, image/*, pdf, png, jpg, webp, gif, bmp, heic)
        #[arg(short = 'M', long = "data-mime")]
        data_mime: Option<String>,

        /// Run local OCR and send recognised text instead of the image
        #[arg(long = "ocr")]
        ocr: bool,

        /// Print the result as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Localize marketing copy (argument, stdin and/or an image)
    Translate {
        /// Text to translate; read from stdin when omitted
        text: Option<String>,

        /// Image containing the copy
        #[arg(short = 'd', long = "data")]
        data: Option<String>,

        /// Run local OCR and send recognised text instead of the image
        #[arg(long = "ocr")]
        ocr: bool,
    },
    /// Render a barcode label as PNG (and optionally PDF)
    Label {
        #[arg(long = "sku")]
        sku: String,

        #[arg(long = "title")]
        title: String,

        /// Option line printed under the title (colour, size, ...)
        #[arg(long = "spec")]
        spec: Option<String>,

        /// PNG output path
        #[arg(short = 'o', long = "output")]
        output: String,

        /// Also write a PDF at the physical label size
        #[arg(long = "pdf")]
        pdf: Option<String>,
    },
    /// Serve the browser UI
    Serve {
        /// Listen address (default from settings [server] addr)
        #[arg(long = "addr")]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    lxu_listing_tools::logging::init(cli.verbose)?;

    let config = lxu_listing_tools::Config {
        model: cli.model,
        key: cli.key,
        settings_path: cli.read_settings,
        with_using_tokens: cli.with_using_tokens,
        with_using_model: cli.with_using_model,
    };

    let task = async move {
        let result: Result<Option<String>> = match cli.command {
            Command::Keywords {
                data,
                data_mime,
                ocr,
                json,
            } => lxu_listing_tools::run_keywords(
                config,
                lxu_listing_tools::KeywordsCommand {
                    data,
                    data_mime,
                    ocr,
                    json,
                },
            )
            .await
            .map(Some),
            Command::Translate { text, data, ocr } => {
                let text = match text {
                    Some(text) => text,
                    None => read_stdin_text(data.is_some())?,
                };
                lxu_listing_tools::run_translate(
                    config,
                    lxu_listing_tools::TranslateCommand { text, data, ocr },
                )
                .await
                .map(Some)
            }
            Command::Label {
                sku,
                title,
                spec,
                output,
                pdf,
            } => lxu_listing_tools::run_label(
                config,
                lxu_listing_tools::LabelCommand {
                    spec: lxu_listing_tools::LabelSpec {
                        sku,
                        title,
                        spec_option: spec,
                    },
                    output,
                    pdf,
                },
            )
            .map(Some),
            Command::Serve { addr } => lxu_listing_tools::run_serve(config, addr)
                .await
                .map(|_| None),
        };
        result
    };

    let output = tokio::select! {
        result = task => result?,
        _ = tokio::signal::ctrl_c() => return Err(anyhow!("interrupted")),
    };

    if let Some(output) = output {
        println!("{}", output);
    }
    Ok(())
}

fn read_stdin_text(has_data: bool) -> Result<String> {
    if io::stdin().is_terminal() {
        if has_data {
            return Ok(String::new());
        }
        return Err(anyhow!("no text given: pass TEXT, pipe stdin or use --data"));
    }
    let mut buffer = Vec::new();
    io::stdin().read_to_end(&mut buffer)?;
    String::from_utf8(buffer).map_err(|_| anyhow!("stdin must be UTF-8 text"))
}
