use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

use crate::settings::ListingSettings;

const KEYWORDS_TEMPLATE: &str = include_str!("keywords.tera");
const LOCALIZE_TEMPLATE: &str = include_str!("localize.tera");

pub fn render_keywords_prompt(listing: &ListingSettings) -> Result<String> {
    let mut context = base_context(listing);
    context.insert("keyword_count", &listing.keywords);
    context.insert("name_count", &listing.name_variants);
    context.insert("title_count", &listing.title_variants);
    Tera::one_off(KEYWORDS_TEMPLATE, &context, false)
        .with_context(|| "failed to render keywords prompt")
}

pub fn render_localize_prompt(listing: &ListingSettings) -> Result<String> {
    let context = base_context(listing);
    Tera::one_off(LOCALIZE_TEMPLATE, &context, false)
        .with_context(|| "failed to render localize prompt")
}

fn base_context(listing: &ListingSettings) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("brand", listing.brand.as_str());
    context.insert("market", listing.market.as_str());
    context.insert("language", listing.language.as_str());
    context.insert("source_language", listing.source_language.as_str());
    context
}
