use lxu_listing_tools::prompts::{render_keywords_prompt, render_localize_prompt};
use lxu_listing_tools::settings::ListingSettings;

#[test]
fn keywords_prompt_snapshot() {
    let prompt = render_keywords_prompt(&ListingSettings::default()).unwrap();
    insta::assert_snapshot!(prompt);
}

#[test]
fn localize_prompt_snapshot() {
    let prompt = render_localize_prompt(&ListingSettings::default()).unwrap();
    insta::assert_snapshot!(prompt);
}
