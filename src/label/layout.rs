use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::debug;

use super::LabelSpec;
use super::barcode::{self, Barcode};
use super::font::{FontMetrics, measure_text_width_px};
use super::wrap::wrap_words;
use crate::settings::LabelSettings;

const TITLE_LINE_HEIGHT: f32 = 1.15;
const SMALL_LINE_HEIGHT: f32 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineRole {
    Sku,
    Title,
    SpecOption,
    Footer,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextLine {
    pub text: String,
    pub role: LineRole,
    /// Horizontal centre of the line.
    pub x: f32,
    pub baseline: f32,
    pub font_size: f32,
    pub width: f32,
}

#[derive(Debug, Clone)]
pub struct BarcodePlacement {
    pub barcode: Barcode,
    pub x: u32,
    pub y: u32,
    pub module_px: u32,
    pub height: u32,
}

impl BarcodePlacement {
    /// Dark rectangles as `(x, width)` in pixels.
    pub fn bar_rects(&self) -> Vec<(u32, u32)> {
        self.barcode
            .bars()
            .into_iter()
            .map(|(start, len)| {
                (
                    self.x + start as u32 * self.module_px,
                    len as u32 * self.module_px,
                )
            })
            .collect()
    }

    pub fn width(&self) -> u32 {
        self.barcode.modules.len() as u32 * self.module_px
    }
}

#[derive(Debug, Clone)]
pub struct LabelLayout {
    pub width: u32,
    pub height: u32,
    pub max_text_width: f32,
    pub barcode: BarcodePlacement,
    pub lines: Vec<TextLine>,
    /// Title/spec lines that did not fit and were left out.
    pub dropped_lines: usize,
}

pub fn layout_label(
    spec: &LabelSpec,
    settings: &LabelSettings,
    font: Option<&FontMetrics>,
) -> Result<LabelLayout> {
    let sku = spec.sku.trim();
    let title = spec.title.trim();
    if title.is_empty() {
        return Err(anyhow!("title is empty"));
    }
    let barcode = barcode::encode(sku)?;

    let (width, height) = settings.canvas_size();
    let margin = settings.margin_px.min(width.min(height) / 4);
    let inner_width = width.saturating_sub(margin * 2);
    let max_text_width = inner_width as f32;

    let available_modules = barcode.width_with_quiet_zone() as u32;
    let max_module_px = ((settings.dpi as f32 / 100.0).round() as u32).max(1);
    let module_px = (inner_width / available_modules).min(max_module_px);
    if module_px == 0 {
        return Err(anyhow!("sku is too long for the label width"));
    }
    let bar_width = barcode.modules.len() as u32 * module_px;
    let bar_height = ((height as f32 * settings.barcode_height_ratio).round() as u32).max(1);
    let placement = BarcodePlacement {
        barcode,
        x: (width - bar_width) / 2,
        y: margin,
        module_px,
        height: bar_height,
    };

    let center = width as f32 / 2.0;
    let small = settings.small_font_size;
    let title_size = settings.title_font_size;
    let measure = |text: &str, size: f32| measure_text_width_px(text, size, font);
    let line = |text: String, role: LineRole, baseline: f32, size: f32| TextLine {
        width: measure(&text, size),
        text,
        role,
        x: center,
        baseline,
        font_size: size,
    };

    let mut lines = Vec::new();
    let sku_baseline = (margin + bar_height) as f32 + small;
    lines.push(line(sku.to_string(), LineRole::Sku, sku_baseline, small));

    let footer = settings.footer.trim();
    let bottom_baseline = height.saturating_sub(margin) as f32;
    if sku_baseline > bottom_baseline {
        return Err(anyhow!(
            "label is too short for the barcode and text ({} px)",
            height
        ));
    }
    let region_bottom = if footer.is_empty() {
        bottom_baseline
    } else {
        bottom_baseline - small - 2.0
    };
    let region_top = sku_baseline + small * 0.35;
    let region = (region_bottom - region_top).max(0.0);

    let title_lines = wrap_words(title, max_text_width, |text| measure(text, title_size));
    let spec_lines = spec
        .spec_option
        .as_deref()
        .map(|value| wrap_words(value, max_text_width, |text| measure(text, small)))
        .unwrap_or_default();

    let title_step = title_size * TITLE_LINE_HEIGHT;
    let small_step = small * SMALL_LINE_HEIGHT;
    let reserve = if spec_lines.is_empty() { 0.0 } else { small_step };

    let mut block: Vec<(String, LineRole, f32, f32)> = Vec::new();
    let mut used = 0.0f32;
    for text in &title_lines {
        if used + title_step + reserve > region {
            break;
        }
        block.push((text.clone(), LineRole::Title, title_size, title_step));
        used += title_step;
    }
    if block.is_empty() && title_step <= region && !title_lines.is_empty() {
        block.push((title_lines[0].clone(), LineRole::Title, title_size, title_step));
        used += title_step;
    }
    for text in &spec_lines {
        if used + small_step > region {
            break;
        }
        block.push((text.clone(), LineRole::SpecOption, small, small_step));
        used += small_step;
    }
    let dropped_lines = title_lines.len() + spec_lines.len() - block.len();
    if dropped_lines > 0 {
        debug!("label: {} line(s) do not fit and were dropped", dropped_lines);
    }

    let mut cursor = region_top + (region - used) / 2.0;
    for (text, role, size, step) in block {
        let baseline = cursor + (step - size) / 2.0 + size * 0.85;
        lines.push(line(text, role, baseline, size));
        cursor += step;
    }

    if !footer.is_empty() {
        lines.push(line(
            footer.to_string(),
            LineRole::Footer,
            bottom_baseline,
            small,
        ));
    }

    Ok(LabelLayout {
        width,
        height,
        max_text_width,
        barcode: placement,
        lines,
        dropped_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(sku: &str, title: &str, option: Option<&str>) -> LabelSpec {
        LabelSpec {
            sku: sku.to_string(),
            title: title.to_string(),
            spec_option: option.map(str::to_string),
        }
    }

    fn roles(layout: &LabelLayout) -> Vec<LineRole> {
        layout.lines.iter().map(|line| line.role).collect()
    }

    #[test]
    fn default_canvas_is_fifty_by_twenty_millimetres() {
        let settings = LabelSettings::default();
        let layout = layout_label(&spec("LXU-001", "수납함", None), &settings, None).unwrap();
        assert_eq!((layout.width, layout.height), (591, 236));
        assert_eq!(
            roles(&layout),
            vec![LineRole::Sku, LineRole::Title, LineRole::Footer]
        );
    }

    #[test]
    fn barcode_keeps_quiet_zone_and_integer_modules() {
        let settings = LabelSettings::default();
        let layout = layout_label(&spec("LXU-001", "box", None), &settings, None).unwrap();
        let bars = &layout.barcode;
        assert_eq!(bars.module_px, 3);
        let quiet = barcode::QUIET_ZONE_MODULES as u32 * bars.module_px;
        assert!(bars.x >= quiet);
        assert!(bars.x + bars.width() + quiet <= layout.width);
        let (first_x, _) = bars.bar_rects()[0];
        assert_eq!(first_x, bars.x);
    }

    #[test]
    fn long_title_and_option_stay_in_order_and_inside_the_canvas() {
        let settings = LabelSettings::default();
        let title = "LxU 접이식 대용량 수납함 옷 정리함 뚜껑 포함 다용도 리빙박스 그레이 3개 세트 \
                     옷장 이불 보관 가방 대형 사이즈 원룸 자취 필수템";
        let layout = layout_label(
            &spec("LXU-001", title, Some("그레이 / 3개")),
            &settings,
            None,
        )
        .unwrap();
        let roles = roles(&layout);
        assert_eq!(roles.first(), Some(&LineRole::Sku));
        assert_eq!(roles.last(), Some(&LineRole::Footer));
        assert!(roles.contains(&LineRole::SpecOption));
        assert!(layout.dropped_lines > 0);

        let mut previous = 0.0;
        for line in &layout.lines {
            assert!(line.baseline > previous);
            assert!(line.baseline <= layout.height as f32);
            previous = line.baseline;
            if matches!(line.role, LineRole::Title | LineRole::SpecOption) {
                assert!(line.width <= layout.max_text_width || !line.text.contains(' '));
            }
        }
        assert!(layout.lines[0].baseline > (layout.barcode.y + layout.barcode.height) as f32);
    }

    #[test]
    fn blank_footer_is_omitted() {
        let mut settings = LabelSettings::default();
        settings.footer = String::new();
        let layout = layout_label(&spec("A1", "box", Some("L")), &settings, None).unwrap();
        assert_eq!(
            roles(&layout),
            vec![LineRole::Sku, LineRole::Title, LineRole::SpecOption]
        );
    }

    #[test]
    fn rejects_unprintable_or_oversized_input() {
        let settings = LabelSettings::default();
        let long_sku = "X".repeat(60);
        let err = layout_label(&spec(&long_sku, "box", None), &settings, None).unwrap_err();
        assert_eq!(err.to_string(), "sku is too long for the label width");
        assert!(layout_label(&spec("수납-1", "box", None), &settings, None).is_err());
        assert!(layout_label(&spec("  ", "box", None), &settings, None).is_err());
        assert!(layout_label(&spec("A1", " ", None), &settings, None).is_err());
    }

    #[test]
    fn canvas_shorter_than_the_margins_is_an_error() {
        let mut settings = LabelSettings::default();
        settings.height_mm = 0.5;
        let err = layout_label(&spec("A1", "box", None), &settings, None).unwrap_err();
        assert!(err.to_string().starts_with("label is too short"));

        settings.height_mm = 20.0;
        settings.margin_px = 500;
        let layout = layout_label(&spec("A1", "box", None), &settings, None).unwrap();
        assert_eq!(layout.barcode.y, layout.height / 4);
    }
}
