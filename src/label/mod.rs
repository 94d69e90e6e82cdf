//! Printable SKU labels: a Code 128 barcode, the SKU in plain text, the
//! wrapped product title, an optional option line and a footer.

mod barcode;
mod font;
mod layout;
mod pdf;
mod render;
mod wrap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use usvg::fontdb;

use crate::settings::LabelSettings;

pub use barcode::{Barcode, QUIET_ZONE_MODULES, decode_row, encode as encode_code128};
pub use font::{ResolvedFont, resolve_label_font};
pub use layout::{BarcodePlacement, LabelLayout, LineRole, TextLine, layout_label};
pub use wrap::wrap_words;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub sku: String,
    pub title: String,
    #[serde(default)]
    pub spec_option: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderedLabel {
    pub spec: LabelSpec,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub struct LabelRenderer {
    settings: LabelSettings,
    font: Option<ResolvedFont>,
    fonts: Arc<fontdb::Database>,
}

impl LabelRenderer {
    /// Resolves the label font once; system fonts are scanned here.
    pub fn new(settings: LabelSettings) -> Self {
        let font = resolve_label_font(&settings);
        let fonts = render::label_font_database(font.as_ref().map(|font| font.metrics.data()));
        Self {
            settings,
            font,
            fonts,
        }
    }

    pub fn settings(&self) -> &LabelSettings {
        &self.settings
    }

    pub fn font_family(&self) -> &str {
        self.font
            .as_ref()
            .map(|font| font.family.as_str())
            .unwrap_or("sans-serif")
    }

    pub fn layout(&self, spec: &LabelSpec) -> Result<LabelLayout> {
        layout_label(
            spec,
            &self.settings,
            self.font.as_ref().map(|font| &font.metrics),
        )
    }

    pub fn render_svg(&self, spec: &LabelSpec) -> Result<String> {
        let layout = self.layout(spec)?;
        Ok(render::render_svg(&layout, self.font_family()))
    }

    pub fn render(&self, spec: &LabelSpec) -> Result<RenderedLabel> {
        let layout = self.layout(spec)?;
        let svg = render::render_svg(&layout, self.font_family());
        let png = render::render_png(&svg, self.fonts.clone())?;
        debug!(
            "label {} rendered at {}x{} ({} bytes)",
            spec.sku.trim(),
            layout.width,
            layout.height,
            png.len()
        );
        Ok(RenderedLabel {
            spec: spec.clone(),
            png,
            width: layout.width,
            height: layout.height,
        })
    }

    pub fn render_pdf(&self, label: &RenderedLabel) -> Result<Vec<u8>> {
        pdf::label_pdf(&label.png, &self.settings)
    }
}
