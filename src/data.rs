use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

pub const PDF_MIME: &str = "application/pdf";
pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct DataAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

impl DataAttachment {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    pub fn is_pdf(&self) -> bool {
        self.mime == PDF_MIME
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            let ext = extension_from_mime(&self.mime).unwrap_or("bin");
            format!("upload.{}", ext)
        })
    }
}

pub fn load_attachment(path: &Path, mime_hint: Option<&str>) -> Result<DataAttachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read data file: {}", path.display()))?;
    let mime = resolve_mime(mime_hint.unwrap_or("auto"), &bytes, Some(path))?;
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .map(|value| value.to_string());
    Ok(DataAttachment { bytes, mime, name })
}

pub fn load_attachment_from_bytes(
    bytes: Vec<u8>,
    mime_hint: Option<&str>,
    name: Option<&str>,
) -> Result<DataAttachment> {
    if bytes.is_empty() {
        return Err(anyhow!("uploaded data is empty"));
    }
    let path = name.map(PathBuf::from);
    let mime = resolve_mime(mime_hint.unwrap_or("auto"), &bytes, path.as_deref())?;
    Ok(DataAttachment {
        bytes,
        mime,
        name: name.map(|value| value.to_string()),
    })
}

/// Restricts an attachment to the kinds the model tools accept.
pub fn ensure_model_input(data: &DataAttachment, allow_pdf: bool) -> Result<()> {
    if data.is_image() || (allow_pdf && data.is_pdf()) {
        return Ok(());
    }
    let expected = if allow_pdf { "an image or pdf" } else { "an image" };
    Err(anyhow!(
        "unsupported upload '{}' ({}); expected {}",
        data.display_name(),
        data.mime,
        expected
    ))
}

fn resolve_mime(input: &str, bytes: &[u8], path: Option<&Path>) -> Result<String> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(anyhow!("data-mime is empty"));
    }
    let lower = raw.to_lowercase();

    match lower.as_str() {
        "auto" => return detect_mime(bytes, path, false),
        "image" | "image/*" => return detect_mime(bytes, path, true),
        "pdf" => return Ok(PDF_MIME.to_string()),
        "png" => return Ok(PNG_MIME.to_string()),
        "jpg" | "jpeg" => return Ok(JPEG_MIME.to_string()),
        "gif" => return Ok("image/gif".to_string()),
        "webp" => return Ok("image/webp".to_string()),
        "bmp" => return Ok("image/bmp".to_string()),
        "heic" => return Ok("image/heic".to_string()),
        _ => {}
    }

    if lower == PDF_MIME || lower.starts_with("image/") {
        return Ok(lower);
    }

    Err(anyhow!(
        "unsupported --data-mime '{}' (expected auto, image/*, pdf, png, jpg, webp, gif, bmp, heic)",
        raw
    ))
}

fn detect_mime(bytes: &[u8], path: Option<&Path>, require_image: bool) -> Result<String> {
    let detected = infer::get(bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| mime.starts_with("image/") || *mime == PDF_MIME)
        .or_else(|| extension_lower(path).and_then(|ext| mime_from_extension(&ext)));

    match detected {
        Some(mime) if require_image && !mime.starts_with("image/") => Err(anyhow!(
            "data-mime image/* requires image data (detected '{}')",
            mime
        )),
        Some(mime) => Ok(mime.to_string()),
        None => Err(anyhow!(
            "unable to detect supported mime for file '{}'",
            path.map(|value| value.display().to_string())
                .unwrap_or_else(|| "upload".to_string())
        )),
    }
}

fn extension_lower(path: Option<&Path>) -> Option<String> {
    path.and_then(|path| path.extension())
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some(PDF_MIME),
        "png" => Some(PNG_MIME),
        "jpg" | "jpeg" => Some(JPEG_MIME),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

pub fn extension_from_mime(mime: &str) -> Option<&'static str> {
    match mime {
        PDF_MIME => Some("pdf"),
        PNG_MIME => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    #[test]
    fn sniffs_png_and_pdf_bytes() {
        let png = load_attachment_from_bytes(PNG_HEADER.to_vec(), None, None).expect("png");
        assert_eq!(png.mime, PNG_MIME);
        assert!(png.is_image());

        let pdf = load_attachment_from_bytes(b"%PDF-1.7\n%...".to_vec(), None, Some("spec.pdf"))
            .expect("pdf");
        assert!(pdf.is_pdf());
        assert_eq!(pdf.display_name(), "spec.pdf");
    }

    #[test]
    fn falls_back_to_extension_then_errors() {
        let jpg = load_attachment_from_bytes(b"not really".to_vec(), None, Some("shot.JPG"))
            .expect("jpg by extension");
        assert_eq!(jpg.mime, JPEG_MIME);

        let err = load_attachment_from_bytes(b"plain".to_vec(), None, Some("notes.docx"))
            .unwrap_err();
        assert!(err.to_string().contains("unable to detect"));
    }

    #[test]
    fn image_hint_rejects_pdf_and_text_hints_are_unsupported() {
        let err = load_attachment_from_bytes(b"%PDF-1.4".to_vec(), Some("image/*"), None)
            .unwrap_err();
        assert!(err.to_string().contains("requires image data"));

        for hint in ["txt", "text", "text/plain"] {
            let err = load_attachment_from_bytes(b"hello".to_vec(), Some(hint), None).unwrap_err();
            assert!(err.to_string().contains("unsupported --data-mime"));
            assert!(err.to_string().ends_with("bmp, heic)"));
        }
        let err = load_attachment_from_bytes(b"hello".to_vec(), None, Some("notes.txt")).unwrap_err();
        assert!(err.to_string().contains("unable to detect"));
        let pdf = load_attachment_from_bytes(b"%PDF-1.4".to_vec(), Some("pdf"), None).expect("pdf");
        assert!(ensure_model_input(&pdf, true).is_ok());
        assert!(ensure_model_input(&pdf, false).is_err());
    }

    #[test]
    fn empty_upload_is_rejected() {
        assert!(load_attachment_from_bytes(Vec::new(), None, Some("a.png")).is_err());
    }
}
