use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

use crate::settings::LabelSettings;

/// Well-known CJK-capable font files, tried after every family lookup failed.
const FALLBACK_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/google-noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/nanum/NanumGothic.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/AppleSDGothicNeo.ttc",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\malgun.ttf",
    "C:\\Windows\\Fonts\\msyh.ttc",
];

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

#[derive(Clone)]
pub struct ResolvedFont {
    pub metrics: FontMetrics,
    pub family: String,
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(data, 0)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// Finds a font for label text: explicit path, configured family, the
/// fallback families, then well-known font files. `None` means the renderer
/// falls back to the generic `sans-serif` family and estimated widths.
pub fn resolve_label_font(settings: &LabelSettings) -> Option<ResolvedFont> {
    if let Some(path) = settings.font_path.as_deref() {
        match load_font_metrics(Path::new(path)) {
            Ok(metrics) => return Some(with_family(metrics, settings.font_family.as_deref())),
            Err(err) => warn!("label font ignored: {err:#}"),
        }
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    let families = settings
        .font_family
        .iter()
        .map(String::as_str)
        .chain(settings.font_fallbacks.iter().map(String::as_str));
    for family in families {
        match load_font_metrics_from_family(&db, family) {
            Ok(resolved) => {
                debug!("label font: {}", resolved.family);
                return Some(resolved);
            }
            Err(err) => debug!("{err:#}"),
        }
    }

    for path in FALLBACK_FONT_PATHS {
        let path = Path::new(path);
        if !path.is_file() {
            continue;
        }
        if let Ok(metrics) = load_font_metrics(path) {
            debug!("label font file: {}", path.display());
            return Some(with_family(metrics, None));
        }
    }

    warn!("no font with CJK coverage found; label text may render as boxes");
    None
}

fn with_family(metrics: FontMetrics, configured: Option<&str>) -> ResolvedFont {
    let family = metrics
        .family()
        .map(|name| name.to_string())
        .or_else(|| configured.map(|name| name.to_string()))
        .unwrap_or_else(|| "sans-serif".to_string());
    ResolvedFont { metrics, family }
}

pub(crate) fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font
        && let Ok(face) = Face::parse(&font.data, font.face_index)
    {
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == ' ' {
                advance = advance.saturating_add(font.space_advance as u32);
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(font.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        let units = font.units_per_em.max(1) as f32;
        return advance as f32 * (font_size / units);
    }
    estimate_text_width_units(text) * font_size
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F
    ) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units).sum()
}

fn load_font_metrics_from_data(data: Vec<u8>, face_index: u32) -> Result<FontMetrics> {
    let face = Face::parse(&data, face_index).map_err(|err| anyhow!("{err}"))?;
    let family = extract_family_name(&face);
    let units_per_em = face.units_per_em().max(1);
    let space_advance = face
        .glyph_index(' ')
        .and_then(|id| face.glyph_hor_advance(id))
        .unwrap_or(units_per_em / 2);
    Ok(FontMetrics {
        data: Arc::new(data),
        units_per_em,
        space_advance,
        family,
        face_index,
    })
}

fn load_font_metrics_from_family(db: &fontdb::Database, family: &str) -> Result<ResolvedFont> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, face_index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let metrics = load_font_metrics_from_data(data, face_index)?;
    Ok(with_family(metrics, Some(family)))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
