use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

use crate::settings::Settings;

const INDEX_TEMPLATE: &str = include_str!("index.html.tera");

pub(crate) fn render_index(settings: &Settings) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("brand", settings.listing.brand.as_str());
    context.insert("market", settings.listing.market.as_str());
    context.insert("language", settings.listing.language.as_str());
    context.insert("default_model", &settings.default_model);
    let (width, height) = settings.label.canvas_size();
    context.insert("label_width", &width);
    context.insert("label_height", &height);
    Tera::one_off(INDEX_TEMPLATE, &context, true).with_context(|| "failed to render index page")
}
