use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const HOME_DIR_NAME: &str = ".lxu-listing-tools";

#[derive(Debug, Clone)]
pub struct Settings {
    pub default_model: Option<String>,
    pub listing: ListingSettings,
    pub upload: UploadSettings,
    pub ocr_languages: String,
    pub label: LabelSettings,
    pub history_limit: usize,
    pub server_addr: String,
    /// Largest request body `serve` accepts; uploads arrive base64 encoded.
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ListingSettings {
    pub brand: String,
    pub market: String,
    pub language: String,
    pub source_language: String,
    pub keywords: usize,
    pub name_variants: usize,
    pub title_variants: usize,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub inline_limit_bytes: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LabelSettings {
    pub width_mm: f32,
    pub height_mm: f32,
    pub dpi: u32,
    pub margin_px: u32,
    pub barcode_height_ratio: f32,
    pub title_font_size: f32,
    pub small_font_size: f32,
    pub footer: String,
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub font_fallbacks: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_model: None,
            listing: ListingSettings::default(),
            upload: UploadSettings::default(),
            ocr_languages: "kor+chi_sim+eng".to_string(),
            label: LabelSettings::default(),
            history_limit: 10,
            server_addr: "127.0.0.1:8787".to_string(),
            max_upload_bytes: 40_000_000,
        }
    }
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            brand: "LxU".to_string(),
            market: "Coupang".to_string(),
            language: "Korean".to_string(),
            source_language: "Chinese".to_string(),
            keywords: 3,
            name_variants: 3,
            title_variants: 3,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            inline_limit_bytes: 4_000_000,
            poll_interval: Duration::from_millis(2000),
            poll_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            width_mm: 50.0,
            height_mm: 20.0,
            dpi: 300,
            margin_px: 12,
            barcode_height_ratio: 0.34,
            title_font_size: 26.0,
            small_font_size: 18.0,
            footer: "MADE IN CHINA".to_string(),
            font_path: None,
            font_family: None,
            font_fallbacks: Vec::new(),
        }
    }
}

impl LabelSettings {
    pub fn canvas_size(&self) -> (u32, u32) {
        (mm_to_px(self.width_mm, self.dpi), mm_to_px(self.height_mm, self.dpi))
    }
}

fn mm_to_px(mm: f32, dpi: u32) -> u32 {
    ((mm / 25.4) * dpi as f32).round().max(1.0) as u32
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    model: Option<ModelSection>,
    listing: Option<ListingSection>,
    upload: Option<UploadSection>,
    ocr: Option<OcrSection>,
    label: Option<LabelSection>,
    session: Option<SessionSection>,
    server: Option<ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSection {
    default: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListingSection {
    brand: Option<String>,
    market: Option<String>,
    language: Option<String>,
    source_language: Option<String>,
    keywords: Option<usize>,
    name_variants: Option<usize>,
    title_variants: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadSection {
    inline_limit_bytes: Option<usize>,
    poll_interval_ms: Option<u64>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSection {
    languages: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LabelSection {
    width_mm: Option<f32>,
    height_mm: Option<f32>,
    dpi: Option<u32>,
    margin_px: Option<u32>,
    barcode_height_ratio: Option<f32>,
    title_font_size: Option<f32>,
    small_font_size: Option<f32>,
    footer: Option<String>,
    font_path: Option<String>,
    font_family: Option<String>,
    font_fallbacks: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionSection {
    histories: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(model) = incoming.model {
            if let Some(value) = non_blank(model.default) {
                self.default_model = Some(value);
            }
        }
        if let Some(listing) = incoming.listing {
            self.listing.merge(listing);
        }
        if let Some(upload) = incoming.upload {
            if let Some(limit) = upload.inline_limit_bytes {
                self.upload.inline_limit_bytes = limit;
            }
            if let Some(ms) = upload.poll_interval_ms.filter(|value| *value > 0) {
                self.upload.poll_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = upload.poll_timeout_secs.filter(|value| *value > 0) {
                self.upload.poll_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(ocr) = incoming.ocr {
            if let Some(languages) = non_blank(ocr.languages) {
                self.ocr_languages = languages;
            }
        }
        if let Some(label) = incoming.label {
            self.label.merge(label);
        }
        if let Some(session) = incoming.session {
            if let Some(limit) = session.histories.filter(|value| *value > 0) {
                self.history_limit = limit;
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = non_blank(server.addr) {
                self.server_addr = addr;
            }
            if let Some(limit) = server.max_upload_bytes.filter(|value| *value > 0) {
                self.max_upload_bytes = limit;
            }
        }
    }
}

impl ListingSettings {
    fn merge(&mut self, incoming: ListingSection) {
        if let Some(brand) = non_blank(incoming.brand) {
            self.brand = brand;
        }
        if let Some(market) = non_blank(incoming.market) {
            self.market = market;
        }
        if let Some(language) = non_blank(incoming.language) {
            self.language = language;
        }
        if let Some(language) = non_blank(incoming.source_language) {
            self.source_language = language;
        }
        if let Some(count) = incoming.keywords.filter(|value| *value > 0) {
            self.keywords = count;
        }
        if let Some(count) = incoming.name_variants.filter(|value| *value > 0) {
            self.name_variants = count;
        }
        if let Some(count) = incoming.title_variants.filter(|value| *value > 0) {
            self.title_variants = count;
        }
    }
}

impl LabelSettings {
    fn merge(&mut self, incoming: LabelSection) {
        if let Some(width) = incoming.width_mm.filter(|value| *value > 0.0) {
            self.width_mm = width;
        }
        if let Some(height) = incoming.height_mm.filter(|value| *value > 0.0) {
            self.height_mm = height;
        }
        if let Some(dpi) = incoming.dpi.filter(|value| *value > 0) {
            self.dpi = dpi;
        }
        if let Some(margin) = incoming.margin_px {
            self.margin_px = margin;
        }
        if let Some(ratio) = incoming
            .barcode_height_ratio
            .filter(|value| *value > 0.0 && *value < 1.0)
        {
            self.barcode_height_ratio = ratio;
        }
        if let Some(size) = incoming.title_font_size.filter(|value| *value > 0.0) {
            self.title_font_size = size;
        }
        if let Some(size) = incoming.small_font_size.filter(|value| *value > 0.0) {
            self.small_font_size = size;
        }
        if let Some(footer) = incoming.footer {
            self.footer = footer.trim().to_string();
        }
        if let Some(path) = non_blank(incoming.font_path) {
            self.font_path = Some(path);
        }
        if let Some(family) = non_blank(incoming.font_family) {
            self.font_family = Some(family);
        }
        if let Some(fallbacks) = incoming.font_fallbacks {
            let fallbacks = fallbacks
                .into_iter()
                .filter(|value| !value.trim().is_empty())
                .collect::<Vec<_>>();
            if !fallbacks.is_empty() {
                self.font_fallbacks = fallbacks;
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(HOME_DIR_NAME))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn defaults_come_from_embedded_file() {
        with_temp_home(|home| {
            let settings = load_settings(None).expect("settings");
            assert_eq!(
                settings.default_model.as_deref(),
                Some("gemini:gemini-1.5-flash")
            );
            assert_eq!(settings.listing.brand, "LxU");
            assert_eq!(settings.label.canvas_size(), (591, 236));
            assert!(!settings.label.font_fallbacks.is_empty());
            assert_eq!(settings.max_upload_bytes, 40_000_000);
            assert!(home.join(HOME_DIR_NAME).join("settings.toml").exists());
        });
    }

    #[test]
    fn extra_file_overrides_and_ignores_blank_values() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            fs::write(
                &extra,
                "[listing]\nbrand = \"ACME\"\nmarket = \"  \"\n\n[label]\ndpi = 203\nfooter = \"\"\n\n[upload]\npoll_timeout_secs = 0\n\n[server]\nmax_upload_bytes = 1024\n",
            )
            .expect("write extra");
            let settings = load_settings(Some(&extra)).expect("settings");
            assert_eq!(settings.listing.brand, "ACME");
            assert_eq!(settings.listing.market, "Coupang");
            assert_eq!(settings.label.dpi, 203);
            assert_eq!(settings.label.footer, "");
            assert_eq!(settings.upload.poll_timeout, Duration::from_secs(120));
            assert_eq!(settings.max_upload_bytes, 1024);
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(&home.join("nope.toml"))).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));
        });
    }
}
