//! Prompt text and response schemas for every model role

use docnav_common::llm::ResponseSchema;
use docnav_common::models::{Chunk, FilterMode};
use serde_json::json;

pub const FILTER_SCHEMA_NAME: &str = "relevance_verdicts";
pub const ANSWER_SCHEMA_NAME: &str = "grounded_answer";
pub const VERIFY_SCHEMA_NAME: &str = "answer_verification";
pub const INPUT_SCHEMA_NAME: &str = "parsed_input";

const COARSE_SYSTEM: &str = "You are a document navigation assistant with working knowledge of law, \
medicine, finance, taxation, engineering and software. Your task:\n\
1. Decide for every text chunk whether it may contain information that helps answer the user's question.\n\
2. Record your reasoning in the scratchpad for later reference.\n\
3. Select chunks that are directly or indirectly related to the question; skip chunks that are clearly unrelated.\n\
When unsure, mark the chunk relevant: a later pass removes false positives, but a chunk dropped here is lost.\n\
First think about what information the answer requires, then judge the chunks.";

const FINE_SYSTEM: &str = "You are a document analysis expert looking for passages that answer the user's question.\n\
Your goals:\n\
1. Judge strictly whether each sub-chunk directly provides the answer or a key fact for it.\n\
2. Select only sub-chunks that contain complete, explicit information; exclude merely related or tangential text.\n\
3. Explain for every sub-chunk why it was selected or excluded.\n\
Rules:\n\
- Notes from the previous pass give rough context, but decide on the sub-chunk's own content.\n\
- Prefer specific, direct content such as numbers, dates and explicit statements over vague or speculative text.\n\
- Precision matters more than quantity.";

const SYNTHESIS_SYSTEM: &str = "You answer questions strictly from the document fragments provided. \
Use only facts stated in the fragments; if they do not contain enough information, say so. \
Never invent facts, numbers or fragment ids. Answer in the language of the question.";

const VERIFY_SYSTEM: &str = "You are an independent fact checker. Judge whether an answer is factually \
supported by the given document fragments and whether it actually addresses the question. \
Ignore style, tone and length; judge support and relevance only.";

const INPUT_SYSTEM: &str = "You extract two things from a user's message: the question they want answered \
and the local path of the document to search. Paths may be Windows style (C:\\docs\\file.pdf) or Unix style \
(/home/user/file.pdf); keep the path exactly as written, including spaces. Keep the question concise and \
focused on the core request. If either part cannot be found, return an empty string for it and explain why in \
reasoning.";

pub const STRICT_JSON_RETRY: &str = "Your previous reply could not be used. Reply with ONLY one JSON object \
that follows the requested schema exactly: no prose, no markdown code fences, no comments.";

pub fn filter_system(mode: FilterMode) -> &'static str {
    match mode {
        FilterMode::Coarse => COARSE_SYSTEM,
        FilterMode::Fine => FINE_SYSTEM,
    }
}

pub fn synthesis_system() -> &'static str {
    SYNTHESIS_SYSTEM
}

pub fn verify_system() -> &'static str {
    VERIFY_SYSTEM
}

pub fn input_system() -> &'static str {
    INPUT_SYSTEM
}

fn push_chunk_block(prompt: &mut String, tag: &str, chunk: &Chunk) {
    prompt.push_str(&format!("<{} id=\"{}\">\n{}\n</{}>\n", tag, chunk.id, chunk.text.trim(), tag));
}

fn id_list(chunks: &[&Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prompt for one filter batch
pub fn filter_prompt(
    question: &str,
    mode: FilterMode,
    chunks: &[&Chunk],
    prior_notes: &[String],
) -> String {
    let mut prompt = format!("Pass: {}\nQuestion: {}\n\n", mode, question);

    if !prior_notes.is_empty() {
        prompt.push_str("Notes from the previous pass (orientation only):\n");
        for note in prior_notes {
            prompt.push_str(&format!("- {}\n", note.trim()));
        }
        prompt.push('\n');
    }

    prompt.push_str("Candidate chunks:\n");
    for chunk in chunks {
        push_chunk_block(&mut prompt, "chunk", chunk);
    }

    prompt.push_str(&format!(
        "\nReturn a JSON object with a \"scratchpad\" string and a \"verdicts\" array holding exactly one \
entry per chunk id [{}]. Each entry has \"chunk_id\" (integer), \"is_relevant\" (boolean), \
\"relevance\" (number from 0 to 1) and \"reasoning\" (string).",
        id_list(chunks)
    ));
    prompt
}

/// Retry instruction for a filter batch, repeating the ids that need verdicts
pub fn filter_retry_instruction(chunks: &[&Chunk]) -> String {
    format!(
        "{} Include one verdict for every chunk id: [{}].",
        STRICT_JSON_RETRY,
        id_list(chunks)
    )
}

pub fn filter_schema() -> ResponseSchema {
    ResponseSchema::new(
        FILTER_SCHEMA_NAME,
        json!({
            "type": "object",
            "properties": {
                "scratchpad": { "type": "string" },
                "verdicts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "chunk_id": { "type": "integer" },
                            "is_relevant": { "type": "boolean" },
                            "relevance": { "type": "number", "minimum": 0, "maximum": 1 },
                            "reasoning": { "type": "string" }
                        },
                        "required": ["chunk_id", "is_relevant", "relevance", "reasoning"]
                    }
                }
            },
            "required": ["scratchpad", "verdicts"]
        }),
    )
}

/// Prompt for answer synthesis over the final fragments
pub fn synthesis_prompt(question: &str, fragments: &[&Chunk]) -> String {
    let mut prompt = format!("Question: {}\n\nDocument fragments:\n", question);
    for fragment in fragments {
        push_chunk_block(&mut prompt, "fragment", fragment);
    }
    prompt.push_str(&format!(
        "\nAnswer the question using only these fragments. Cite fragments inline as [#id]. \
Return a JSON object with \"answer\" (string) and \"cited_fragment_ids\" (array of the integer ids you \
actually used; valid ids are [{}]).",
        id_list(fragments)
    ));
    prompt
}

pub fn answer_schema() -> ResponseSchema {
    ResponseSchema::new(
        ANSWER_SCHEMA_NAME,
        json!({
            "type": "object",
            "properties": {
                "answer": { "type": "string" },
                "cited_fragment_ids": { "type": "array", "items": { "type": "integer" } }
            },
            "required": ["answer", "cited_fragment_ids"]
        }),
    )
}

/// Prompt for independent verification of an answer
pub fn verify_prompt(question: &str, answer: &str, fragments: &[&Chunk]) -> String {
    let mut prompt = format!("Question: {}\n\nProposed answer:\n{}\n\nDocument fragments:\n", question, answer);
    for fragment in fragments {
        push_chunk_block(&mut prompt, "fragment", fragment);
    }
    prompt.push_str(
        "\nIs the proposed answer correct, i.e. supported by the fragments and responsive to the question? \
Return a JSON object with \"is_correct\" (boolean) and \"reasoning\" (string).",
    );
    prompt
}

pub fn verify_schema() -> ResponseSchema {
    ResponseSchema::new(
        VERIFY_SCHEMA_NAME,
        json!({
            "type": "object",
            "properties": {
                "is_correct": { "type": "boolean" },
                "reasoning": { "type": "string" }
            },
            "required": ["is_correct", "reasoning"]
        }),
    )
}

/// Prompt for question/path extraction from free-form input
pub fn input_prompt(raw_input: &str) -> String {
    format!(
        "User input: {}\n\nExtract the question and the document path. Return a JSON object with \
\"question\", \"doc_path\" and \"reasoning\" (all strings).",
        raw_input
    )
}

pub fn input_schema() -> ResponseSchema {
    ResponseSchema::new(
        INPUT_SCHEMA_NAME,
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "doc_path": { "type": "string" },
                "reasoning": { "type": "string" }
            },
            "required": ["question", "doc_path", "reasoning"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use docnav_common::models::CharRange;

    fn chunk(id: usize, text: &str) -> Chunk {
        Chunk {
            id,
            depth: 0,
            parent_id: None,
            text: text.to_string(),
            char_range: CharRange::new(0, text.chars().count()),
            token_estimate: text.chars().count(),
            oversized: false,
        }
    }

    #[test]
    fn test_filter_prompt_lists_every_id() {
        let a = chunk(3, "甲方应付款。");
        let b = chunk(7, "乙方应交货。");
        let prompt = filter_prompt("付款期限？", FilterMode::Coarse, &[&a, &b], &[]);

        assert!(prompt.starts_with("Pass: coarse"));
        assert!(prompt.contains("<chunk id=\"3\">\n甲方应付款。\n</chunk>"));
        assert!(prompt.contains("[3, 7]"));
        assert!(!prompt.contains("previous pass"));
    }

    #[test]
    fn test_fine_prompt_carries_notes() {
        let a = chunk(1, "text");
        let notes = vec!["chunk 0 talks about payment".to_string()];
        let prompt = filter_prompt("q", FilterMode::Fine, &[&a], &notes);
        assert!(prompt.contains("Notes from the previous pass"));
        assert!(prompt.contains("- chunk 0 talks about payment"));
    }
}
