//! Turns model output into an [`ExtractionResult`].
//!
//! Models answer in fenced JSON, bare JSON or the labelled line format of the
//! older prompts (`核心词：… / 标题：…`). Anything else is kept as raw text so
//! the caller can still show it.

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordPair {
    pub source_term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub keywords: Vec<KeywordPair>,
    pub internal_name_variants: Vec<String>,
    pub generated_title_variants: Vec<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.internal_name_variants.is_empty()
            && self.generated_title_variants.is_empty()
    }

    pub fn keywords_line(&self) -> String {
        self.keywords
            .iter()
            .map(|pair| match pair.translation.as_deref() {
                Some(translation) => format!("{} ({})", pair.source_term, translation),
                None => pair.source_term.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedListing {
    Structured(ExtractionResult),
    Raw { text: String },
}

impl ParsedListing {
    pub fn structured(&self) -> Option<&ExtractionResult> {
        match self {
            ParsedListing::Structured(result) => Some(result),
            ParsedListing::Raw { .. } => None,
        }
    }
}

pub fn parse_extraction(text: &str) -> ParsedListing {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParsedListing::Raw {
            text: String::new(),
        };
    }

    for candidate in json_candidates(trimmed) {
        if let Some(result) = parse_json_payload(&candidate) {
            return ParsedListing::Structured(result);
        }
    }

    if let Some(result) = parse_labelled_lines(trimmed) {
        return ParsedListing::Structured(result);
    }

    ParsedListing::Raw {
        text: trimmed.to_string(),
    }
}

/// Strips a single surrounding code fence from plain model output.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    fenced_blocks(trimmed)
        .into_iter()
        .next()
        .map(|block| block.trim().to_string())
        .unwrap_or_else(|| trimmed.trim_matches('`').trim().to_string())
}

fn json_candidates(text: &str) -> Vec<String> {
    let mut candidates = fenced_blocks(text);
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}'))
        && start < end
    {
        candidates.push(text[start..=end].to_string());
    }
    candidates
}

fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    for event in Parser::new(text) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(_))) => {
                current = Some(String::new());
            }
            Event::Text(value) => {
                if let Some(block) = current.as_mut() {
                    block.push_str(&value);
                }
            }
            Event::End(Tag::CodeBlock(_)) => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
            }
            _ => {}
        }
    }
    blocks
}

#[derive(Debug, Default, Deserialize)]
struct ListingPayload {
    #[serde(default, alias = "core_keywords")]
    keywords: Vec<KeywordEntry>,
    #[serde(default, alias = "internal_names", alias = "names")]
    internal_name_variants: Vec<String>,
    #[serde(default, alias = "titles", alias = "title_variants")]
    generated_title_variants: Vec<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeywordEntry {
    Plain(String),
    Pair {
        #[serde(alias = "term", alias = "keyword")]
        source_term: String,
        #[serde(default, alias = "meaning")]
        translation: Option<String>,
    },
}

fn parse_json_payload(candidate: &str) -> Option<ExtractionResult> {
    let payload: ListingPayload = serde_json::from_str(candidate.trim()).ok()?;
    let keywords = payload
        .keywords
        .into_iter()
        .filter_map(|entry| match entry {
            KeywordEntry::Plain(term) => split_term(&term),
            KeywordEntry::Pair {
                source_term,
                translation,
            } => non_empty(&source_term).map(|source_term| KeywordPair {
                source_term,
                translation: translation.as_deref().and_then(non_empty),
            }),
        })
        .collect();
    let mut titles = clean_list(payload.generated_title_variants);
    if let Some(title) = payload.title.as_deref().and_then(non_empty)
        && !titles.contains(&title)
    {
        titles.insert(0, title);
    }
    let result = ExtractionResult {
        keywords,
        internal_name_variants: clean_list(payload.internal_name_variants),
        generated_title_variants: titles,
    };
    (!result.is_empty()).then_some(result)
}

const KEYWORD_LABELS: &[&str] = &["核心词", "关键词", "keywords", "keyword", "핵심 키워드", "키워드"];
const TITLE_LABELS: &[&str] = &["标题", "title", "제목"];
const NAME_LABELS: &[&str] = &["内部名称", "内部品名", "品名", "internal names", "internal name"];

fn parse_labelled_lines(text: &str) -> Option<ExtractionResult> {
    let mut result = ExtractionResult::default();
    for line in text.lines() {
        let line = line.replace("**", "");
        for segment in split_at_title_labels(&line) {
            let segment = segment.trim().trim_start_matches(['-', '*', '#', ' ']);
            let Some((label, value)) = split_label(segment) else {
                continue;
            };
            let label = label.trim().to_lowercase();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if KEYWORD_LABELS.contains(&label.as_str()) {
                result
                    .keywords
                    .extend(split_list(value).iter().filter_map(|term| split_term(term)));
            } else if TITLE_LABELS.contains(&label.as_str()) {
                result.generated_title_variants.push(value.to_string());
            } else if NAME_LABELS.contains(&label.as_str()) {
                result.internal_name_variants.extend(split_list(value));
            }
        }
    }
    (!result.is_empty()).then_some(result)
}

/// Cuts a line before every title label that is not at its start, so
/// `核心词：a, b 标题：…` on one line yields both fields.
fn split_at_title_labels(line: &str) -> Vec<&str> {
    let lowered = line.to_ascii_lowercase();
    let cut = TITLE_LABELS
        .iter()
        .flat_map(|label| {
            lowered
                .match_indices(label)
                .map(move |(index, _)| (index, index + label.len()))
        })
        .filter(|(start, end)| {
            *start > 0 && lowered[*end..].trim_start().starts_with([':', '：'])
        })
        .map(|(start, _)| start)
        .min();
    match cut {
        Some(index) => {
            let mut segments = vec![&line[..index]];
            segments.extend(split_at_title_labels(&line[index..]));
            segments
        }
        None => vec![line],
    }
}

fn split_label(line: &str) -> Option<(&str, &str)> {
    let index = line.find([':', '：'])?;
    let colon_len = line[index..].chars().next()?.len_utf8();
    Some((&line[..index], &line[index + colon_len..]))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', '，', '、', ';', '；'])
        .filter_map(|item| non_empty(item.trim_matches(['[', ']', '"', '\'', ' '])))
        .collect()
}

/// Reads `term (translation)` or `term（translation）`.
fn split_term(raw: &str) -> Option<KeywordPair> {
    let raw = raw.trim();
    if let Some(open) = raw.find(['(', '（'])
        && let Some(inner) = raw[open..]
            .strip_suffix([')', '）'])
            .map(|value| value.trim_start_matches(['(', '（']))
    {
        let term = raw[..open].trim();
        if !term.is_empty() {
            return Some(KeywordPair {
                source_term: term.to_string(),
                translation: non_empty(inner),
            });
        }
    }
    non_empty(raw).map(|source_term| KeywordPair {
        source_term,
        translation: None,
    })
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values.iter().filter_map(|value| non_empty(value)).collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
