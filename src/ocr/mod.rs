//! Local OCR for screenshots, backed by the `tesseract` CLI.

mod tesseract;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

pub use tesseract::list_tesseract_languages;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OcrLine {
    pub text: String,
    pub conf: f32,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OcrText {
    pub lines: Vec<OcrLine>,
}

impl OcrText {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.text.trim().is_empty())
    }
}

/// Runs OCR on an encoded image. The image is re-encoded as grayscale PNG
/// into a temporary file that is removed when this returns.
pub fn extract_text(image_bytes: &[u8], ocr_languages: &str) -> Result<OcrText> {
    let image =
        image::load_from_memory(image_bytes).with_context(|| "failed to decode image for OCR")?;
    let languages = tesseract::normalize_ocr_languages(ocr_languages)?;

    let mut tmp = tempfile::Builder::new()
        .prefix("lxu-ocr-")
        .suffix(".png")
        .tempfile()
        .with_context(|| "failed to create temp file for OCR")?;
    image
        .grayscale()
        .write_to(&mut tmp, image::ImageFormat::Png)
        .with_context(|| "failed to write temp image for OCR")?;
    tmp.flush().ok();

    let tsv = tesseract::run_tesseract_tsv(tmp.path(), &languages)?;
    let text = parse_tsv_lines(&tsv);
    debug!("ocr found {} line(s) with {}", text.lines.len(), languages);
    Ok(text)
}

pub(crate) fn parse_tsv_lines(tsv: &str) -> OcrText {
    let mut line_map: BTreeMap<(i32, i32, i32, i32), Vec<(u32, String, f32)>> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        let left: u32 = cols[6].parse().unwrap_or(0);
        line_map
            .entry(key)
            .or_default()
            .push((left, text.to_string(), conf));
    }

    let lines = line_map
        .into_values()
        .map(|mut words| {
            words.sort_by_key(|(left, _, _)| *left);
            let conf = words.iter().map(|(_, _, conf)| conf).sum::<f32>() / words.len() as f32;
            let text = words
                .into_iter()
                .map(|(_, text, _)| text)
                .reduce(|left, right| join_inline(&left, &right))
                .unwrap_or_default();
            OcrLine { text, conf }
        })
        .collect();
    OcrText { lines }
}

fn join_inline(left: &str, right: &str) -> String {
    if needs_space(left, right) {
        format!("{} {}", left.trim_end(), right.trim_start())
    } else {
        format!("{}{}", left.trim_end(), right.trim_start())
    }
}

/// Words of scripts written without spaces (Han, Kana) are glued together.
fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => !(is_unspaced_script(a) && is_unspaced_script(b)),
        _ => false,
    }
}

fn is_unspaced_script(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF | 0x3000..=0x303F | 0xFF00..=0xFFEF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn word(block: i32, line: i32, left: u32, conf: f32, text: &str) -> String {
        format!("5\t1\t{block}\t1\t{line}\t1\t{left}\t10\t40\t20\t{conf}\t{text}")
    }

    #[test]
    fn groups_words_into_lines_in_reading_order() {
        let tsv = [
            HEADER.to_string(),
            "4\t1\t1\t1\t1\t0\t0\t0\t100\t20\t-1\t".to_string(),
            word(1, 1, 120, 90.0, "수납함"),
            word(1, 1, 10, 80.0, "접이식"),
            word(1, 2, 10, 95.0, "收纳"),
            word(1, 2, 60, 85.0, "盒"),
            word(2, 1, 10, -1.0, "noise"),
            word(2, 1, 50, 70.0, "  "),
        ]
        .join("\n");
        let text = parse_tsv_lines(&tsv);
        assert_eq!(text.lines.len(), 2);
        assert_eq!(text.lines[0].text, "접이식 수납함");
        assert_eq!(text.lines[0].conf, 85.0);
        assert_eq!(text.lines[1].text, "收纳盒");
        assert_eq!(text.text(), "접이식 수납함\n收纳盒");
    }

    #[test]
    fn empty_tsv_yields_empty_text() {
        let text = parse_tsv_lines(HEADER);
        assert!(text.is_empty());
        assert_eq!(text.text(), "");
    }
}
