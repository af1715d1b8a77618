//! Input Parser - Splits free-form input into question and document path
//!
//! Provides:
//! - Model-based extraction of `{question, doc_path, reasoning}`
//! - A deterministic fallback that locates a `.pdf`/`.txt`/`.md` path and
//!   keeps the surrounding text as the question

use crate::prompts;
use crate::structured::request_structured;
use docnav_common::errors::{AppError, Result};
use docnav_common::llm::{CompletionRequest, CompletionService};
use docnav_common::models::ParsedInputNote;
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument, warn};

#[derive(Debug, Deserialize)]
struct InputResponse {
    #[serde(default)]
    question: String,

    #[serde(default)]
    doc_path: String,

    #[serde(default)]
    reasoning: String,
}

/// Path patterns tried in order: drive-letter paths, rooted or relative
/// paths, then bare file names. Group 1 is the path; a rooted path may not
/// start in the middle of a word such as `A/B`.
fn path_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        const NAME: &str = r#"[^\s"'“”‘’「」《》，。；：？！,;]"#;
        const EXT: &str = r"\.(?:pdf|txt|markdown|md)\b";
        const START: &str = r"(?:^|[^A-Za-z0-9_./\\-])";
        [
            format!(r"(?i){START}([a-z]:[\\/](?:{NAME}|[ ])*?{EXT})"),
            format!(r"(?i){START}((?:~|\.{{1,2}})?/(?:{NAME}|[ ])*?{EXT})"),
            format!(r"(?i)({NAME}+?{EXT})"),
        ]
        .iter()
        .map(|p| Regex::new(p).expect("path pattern is valid"))
        .collect()
    })
}

/// A path start that follows whitespace inside a longer match
fn inner_path_start() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\s+((?:~|\.{1,2})?/|[A-Za-z]:[\\/])").expect("path start pattern is valid")
    })
}

/// Byte range of the first document path in `input`
fn find_path(input: &str) -> Option<(usize, usize)> {
    let found = path_patterns()
        .iter()
        .find_map(|re| re.captures(input).and_then(|caps| caps.get(1)))?;
    let start = inner_path_start()
        .captures_iter(found.as_str())
        .last()
        .and_then(|caps| caps.get(1))
        .map(|inner| found.start() + inner.start())
        .unwrap_or(found.start());
    Some((start, found.end()))
}

fn trailing_filler() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)[\s，,;；:：]*(?:(?:and\s+)?(?:the\s+)?(?:document|file)(?:\s+path)?(?:\s+is)?(?:\s+at)?|文档路径(?:是|为)?|文件路径(?:是|为)?|文档(?:在|是)|文件(?:在|是)|路径(?:是|为)?)?[\s，,;；:：]*$",
        )
        .expect("filler pattern is valid")
    })
}

/// Free-form input parser over the reasoning backend
pub struct InputParser {
    service: Arc<dyn CompletionService>,
}

impl InputParser {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Extract the question and document path from `raw_input`
    #[instrument(skip_all)]
    pub async fn parse(&self, raw_input: &str) -> Result<ParsedInputNote> {
        let raw_input = raw_input.trim();
        if raw_input.is_empty() {
            return Err(AppError::InvalidInput {
                message: "input is empty".to_string(),
            });
        }

        let request = CompletionRequest::new(prompts::input_prompt(raw_input))
            .with_system(prompts::input_system())
            .with_schema(prompts::input_schema());

        match request_structured::<InputResponse, _>(
            self.service.as_ref(),
            request,
            prompts::STRICT_JSON_RETRY,
            |_| Ok(()),
        )
        .await
        {
            Ok(response) => {
                let question = response.question.trim().to_string();
                let document_path = clean_path(&response.doc_path);
                if !question.is_empty() && !document_path.is_empty() {
                    info!(question = %question, path = %document_path, "Input parsed");
                    return Ok(ParsedInputNote {
                        question,
                        document_path,
                        reasoning: response.reasoning,
                    });
                }
                warn!(reasoning = %response.reasoning, "Model could not extract question and path, trying fallback");
            }
            Err(err) => {
                warn!(error = %err, "Input extraction failed, trying fallback");
            }
        }

        parse_heuristic(raw_input)
    }
}

/// Locate a document path with regexes; the rest of the input is the question
pub fn parse_heuristic(raw_input: &str) -> Result<ParsedInputNote> {
    let Some((start, end)) = find_path(raw_input) else {
        return Err(AppError::InvalidInput {
            message: "no document path (.pdf, .txt or .md) found in input".to_string(),
        });
    };

    let before = strip_filler(&raw_input[..start]);
    let after = strip_filler(&raw_input[end..]);
    let question = if before.is_empty() { after } else { before };

    if question.is_empty() {
        return Err(AppError::InvalidInput {
            message: "no question found in input".to_string(),
        });
    }

    Ok(ParsedInputNote {
        question,
        document_path: clean_path(&raw_input[start..end]),
        reasoning: "extracted with the path pattern fallback".to_string(),
    })
}

fn strip_filler(text: &str) -> String {
    let text = text.trim();
    let stripped = trailing_filler().replace(text, "");
    stripped
        .trim_start_matches(|c: char| c.is_whitespace() || "，,;；:：".contains(c))
        .trim()
        .to_string()
}

fn clean_path(path: &str) -> String {
    path.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’' | '「' | '」' | '《' | '》'))
        .trim()
        .to_string()
}
