//! Scripted completion backend for tests

use async_trait::async_trait;
use docnav_common::errors::CompletionError;
use docnav_common::llm::{CompletionRequest, CompletionService};
use docnav_common::models::ChunkId;
use regex_lite::Regex;
use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) type Responder =
    Box<dyn Fn(&CompletionRequest) -> Result<String, CompletionError> + Send + Sync>;

/// Replays queued responses first, then falls back to a responder closure.
/// Every request is kept for later inspection.
pub(crate) struct ScriptedCompletion {
    script: Mutex<VecDeque<Result<String, CompletionError>>>,
    responder: Option<Responder>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub(crate) fn new(script: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn responder(
        f: impl Fn(&CompletionRequest) -> Result<String, CompletionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(f)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls whose response schema has the given name
    pub(crate) fn calls_for(&self, schema_name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.schema.as_ref().map(|s| s.name.as_str()) == Some(schema_name))
            .count()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.responder {
            Some(f) => f(&request),
            None => Err(CompletionError::Transport {
                message: "script exhausted".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// `(id, text)` of every `<chunk>` or `<fragment>` block in a prompt
pub(crate) fn prompt_blocks(prompt: &str) -> Vec<(ChunkId, String)> {
    let re = Regex::new(r#"(?s)<(?:chunk|fragment) id="(\d+)">\n(.*?)\n</(?:chunk|fragment)>"#).unwrap();
    re.captures_iter(prompt)
        .map(|c| (c[1].parse().unwrap(), c[2].to_string()))
        .collect()
}

/// Filter reply marking exactly the blocks whose text contains `keyword`
pub(crate) fn keyword_verdicts(prompt: &str, keyword: &str) -> String {
    let verdicts: Vec<serde_json::Value> = prompt_blocks(prompt)
        .into_iter()
        .map(|(id, text)| {
            let hit = text.contains(keyword);
            serde_json::json!({
                "chunk_id": id,
                "is_relevant": hit,
                "relevance": if hit { 0.9 } else { 0.1 },
                "reasoning": if hit { "mentions the keyword" } else { "unrelated" },
            })
        })
        .collect();
    serde_json::json!({ "scratchpad": format!("looked for {}", keyword), "verdicts": verdicts }).to_string()
}

/// Filter reply with one fixed verdict for every block
pub(crate) fn uniform_verdicts(prompt: &str, relevant: bool) -> String {
    let verdicts: Vec<serde_json::Value> = prompt_blocks(prompt)
        .into_iter()
        .map(|(id, _)| {
            serde_json::json!({
                "chunk_id": id,
                "is_relevant": relevant,
                "relevance": if relevant { 1.0 } else { 0.0 },
                "reasoning": "fixed",
            })
        })
        .collect();
    serde_json::json!({ "scratchpad": "", "verdicts": verdicts }).to_string()
}
