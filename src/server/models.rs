use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct KeywordsRequest {
    pub(crate) data_base64: Option<String>,
    pub(crate) data_name: Option<String>,
    pub(crate) data_mime: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) key: Option<String>,
    pub(crate) ocr: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct TranslateRequest {
    pub(crate) text: Option<String>,
    pub(crate) data_base64: Option<String>,
    pub(crate) data_name: Option<String>,
    pub(crate) data_mime: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) key: Option<String>,
    pub(crate) ocr: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct LabelRequest {
    pub(crate) sku: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) spec_option: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LabelResponse {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) png_base64: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionCreated {
    pub(crate) session_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
