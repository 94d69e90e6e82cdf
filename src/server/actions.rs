use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;

use crate::data::{self, DataAttachment};
use crate::label::{LabelRenderer, LabelSpec, RenderedLabel};
use crate::listing::{ExtractionInput, ListingAssistant, LocalizationInput};
use crate::providers::{self, Provider, ProviderImpl};
use crate::session::{ExtractionRecord, SessionSnapshot, SessionStore, TranslationRecord};
use crate::settings::Settings;

use super::error::ServerError;
use super::models::{LabelRequest, LabelResponse};

pub(crate) fn build_assistant(
    settings: &Settings,
    model: Option<&str>,
    key: Option<&str>,
) -> Result<ListingAssistant<ProviderImpl>, ServerError> {
    let model = model.map(str::trim).filter(|value| !value.is_empty());
    let key = key.map(str::trim).filter(|value| !value.is_empty());
    let selection =
        providers::resolve_provider_selection(model, settings.default_model.as_deref(), key)
            .map_err(|err| ServerError::bad_request(err.to_string()))?;
    let key = providers::resolve_key(selection.provider, key)
        .map_err(|err| ServerError::bad_request(err.to_string()))?;
    let provider = providers::build_provider(&selection, key, &settings.upload);
    Ok(ListingAssistant::new(provider, settings.clone()))
}

/// Decodes a base64 upload; browser data URLs (`data:…;base64,`) are accepted.
pub(crate) fn decode_upload(
    encoded: Option<&str>,
    mime: Option<&str>,
    name: Option<&str>,
) -> Result<Option<DataAttachment>, ServerError> {
    let Some(encoded) = encoded.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let (url_mime, payload) = match encoded.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((header, payload)) => (header.strip_suffix(";base64"), payload),
            None => return Err(ServerError::bad_request("malformed data URL")),
        },
        None => (None, encoded),
    };
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|err| ServerError::bad_request(format!("invalid base64 data: {}", err)))?;
    let mime = mime
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or(url_mime.filter(|value| !value.is_empty()));
    let name = name.map(str::trim).filter(|value| !value.is_empty());
    data::load_attachment_from_bytes(bytes, mime, name)
        .map(Some)
        .map_err(|err| ServerError::bad_request(err.to_string()))
}

pub(crate) async fn extract_into_session<P: Provider>(
    assistant: &ListingAssistant<P>,
    sessions: &SessionStore,
    id: &str,
    data: DataAttachment,
    ocr: bool,
) -> Result<SessionSnapshot, ServerError> {
    if !sessions.contains(id) {
        return Err(ServerError::session_not_found(id));
    }
    data::ensure_model_input(&data, true).map_err(|err| ServerError::bad_request(err.to_string()))?;
    let source_name = Some(data.display_name());
    let output = assistant
        .extract(ExtractionInput { data, ocr })
        .await
        .map_err(ServerError::upstream)?;
    let record = ExtractionRecord {
        result: output.parsed,
        source_name,
        model: output.model,
        usage: output.usage,
    };
    let limit = sessions.history_limit();
    sessions
        .update(id, |state| state.set_extraction(record, limit))
        .ok_or_else(|| ServerError::session_not_found(id))?;
    sessions
        .snapshot(id)
        .ok_or_else(|| ServerError::session_not_found(id))
}

pub(crate) fn undo_extraction(
    sessions: &SessionStore,
    id: &str,
) -> Result<SessionSnapshot, ServerError> {
    let restored = sessions
        .update(id, |state| state.undo_extraction())
        .ok_or_else(|| ServerError::session_not_found(id))?;
    if !restored {
        return Err(ServerError::conflict("nothing to undo"));
    }
    sessions
        .snapshot(id)
        .ok_or_else(|| ServerError::session_not_found(id))
}

pub(crate) async fn translate_into_session<P: Provider>(
    assistant: &ListingAssistant<P>,
    sessions: &SessionStore,
    id: &str,
    input: LocalizationInput,
) -> Result<SessionSnapshot, ServerError> {
    if !sessions.contains(id) {
        return Err(ServerError::session_not_found(id));
    }
    if input.text.trim().is_empty() && input.data.is_none() {
        return Err(ServerError::bad_request(
            "nothing to translate: provide text or an image",
        ));
    }
    if let Some(data) = input.data.as_ref() {
        data::ensure_model_input(data, false)
            .map_err(|err| ServerError::bad_request(err.to_string()))?;
    }
    let output = assistant
        .localize(input)
        .await
        .map_err(ServerError::upstream)?;
    let record = TranslationRecord {
        text: output.text,
        model: output.model,
        usage: output.usage,
    };
    sessions
        .update(id, |state| state.set_translation(record))
        .ok_or_else(|| ServerError::session_not_found(id))?;
    sessions
        .snapshot(id)
        .ok_or_else(|| ServerError::session_not_found(id))
}

pub(crate) async fn render_label_into_session(
    renderer: Arc<LabelRenderer>,
    sessions: &SessionStore,
    id: &str,
    request: LabelRequest,
) -> Result<LabelResponse, ServerError> {
    if !sessions.contains(id) {
        return Err(ServerError::session_not_found(id));
    }
    let spec = LabelSpec {
        sku: request.sku.unwrap_or_default(),
        title: request.title.unwrap_or_default(),
        spec_option: request
            .spec_option
            .filter(|value| !value.trim().is_empty()),
    };
    let rendered: RenderedLabel = tokio::task::spawn_blocking(move || renderer.render(&spec))
        .await
        .map_err(|err| ServerError::internal(format!("label task failed: {}", err)))?
        .map_err(|err| ServerError::bad_request(err.to_string()))?;
    let response = LabelResponse {
        width: rendered.width,
        height: rendered.height,
        png_base64: BASE64.encode(&rendered.png),
    };
    sessions
        .update(id, |state| state.set_label(rendered))
        .ok_or_else(|| ServerError::session_not_found(id))?;
    Ok(response)
}

pub(crate) fn stored_label(
    sessions: &SessionStore,
    id: &str,
) -> Result<RenderedLabel, ServerError> {
    sessions
        .label(id)
        .ok_or_else(|| ServerError::session_not_found(id))?
        .ok_or_else(|| ServerError::not_found("no label has been generated yet"))
}

/// File name for label downloads, reduced to characters safe in a header.
pub(crate) fn label_file_name(label: &RenderedLabel, ext: &str) -> String {
    let sku = label
        .spec
        .sku
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("label-{}.{}", sku, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedListing;
    use crate::providers::{ProviderFuture, ProviderResponse};
    use axum::http::StatusCode;

    #[derive(Clone)]
    struct TestProvider {
        reply: Result<String, String>,
    }

    impl Provider for TestProvider {
        fn append_system_input(self, _input: String) -> Self {
            self
        }

        fn append_user_input(self, _input: String) -> Self {
            self
        }

        fn append_user_data(self, _data: DataAttachment) -> Self {
            self
        }

        fn generate(self) -> ProviderFuture {
            let reply = self.reply;
            Box::pin(async move {
                match reply {
                    Ok(text) => Ok(ProviderResponse {
                        text,
                        model: Some("test".to_string()),
                        usage: None,
                    }),
                    Err(message) => Err(anyhow::anyhow!(message)),
                }
            })
        }
    }

    fn assistant(reply: Result<&str, &str>) -> ListingAssistant<TestProvider> {
        ListingAssistant::new(
            TestProvider {
                reply: reply.map(str::to_string).map_err(str::to_string),
            },
            Settings::default(),
        )
    }

    fn png_upload() -> DataAttachment {
        decode_upload(
            Some("data:image/png;base64,iVBORw0KGgo="),
            None,
            Some("shot.png"),
        )
        .expect("decode")
        .expect("some")
    }

    #[test]
    fn decodes_plain_base64_and_data_urls() {
        let data = png_upload();
        assert_eq!(data.mime, "image/png");
        assert_eq!(data.name.as_deref(), Some("shot.png"));
        assert!(decode_upload(Some("   "), None, None).unwrap().is_none());
        let err = decode_upload(Some("@@@"), None, None).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn extraction_updates_session_and_undo_restores() {
        let sessions = SessionStore::new(5);
        let id = sessions.create();
        let first = assistant(Ok("Title: LxU 첫번째"));
        extract_into_session(&first, &sessions, &id, png_upload(), false)
            .await
            .expect("first");
        let second = assistant(Ok("no structure here"));
        let snapshot = extract_into_session(&second, &sessions, &id, png_upload(), false)
            .await
            .expect("second");
        assert!(matches!(
            snapshot.extraction.as_ref().map(|record| &record.result),
            Some(ParsedListing::Raw { .. })
        ));
        assert!(snapshot.notice.is_some());
        assert_eq!(snapshot.history_depth, 1);

        let restored = undo_extraction(&sessions, &id).expect("undo");
        assert_eq!(restored.history_depth, 0);
        assert!(restored.notice.is_none());
        let err = undo_extraction(&sessions, &id).unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn model_failure_maps_to_bad_gateway() {
        let sessions = SessionStore::new(5);
        let id = sessions.create();
        let failing = assistant(Err("Gemini API error (500): boom"));
        let err = extract_into_session(&failing, &sessions, &id, png_upload(), false)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.contains("boom"));
        assert!(sessions.snapshot(&id).unwrap().extraction.is_none());
    }

    #[tokio::test]
    async fn unknown_session_and_empty_translation_are_rejected() {
        let sessions = SessionStore::new(5);
        let ok = assistant(Ok("x"));
        let err = extract_into_session(&ok, &sessions, "nope", png_upload(), false)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let id = sessions.create();
        let err = translate_into_session(&ok, &sessions, &id, LocalizationInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let snapshot = translate_into_session(
            &ok,
            &sessions,
            &id,
            LocalizationInput {
                text: "你好".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("translate");
        assert_eq!(snapshot.translation.unwrap().text, "x");
    }

    #[test]
    fn missing_label_is_not_found() {
        let sessions = SessionStore::new(5);
        let id = sessions.create();
        let err = stored_label(&sessions, &id).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.message.contains("no label"));
    }

    #[test]
    fn label_file_names_are_header_safe() {
        let label = RenderedLabel {
            spec: LabelSpec {
                sku: "LXU 01/A".to_string(),
                ..Default::default()
            },
            png: Vec::new(),
            width: 1,
            height: 1,
        };
        assert_eq!(label_file_name(&label, "pdf"), "label-LXU_01_A.pdf");
    }
}
