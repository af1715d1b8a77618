//! Markdown rendering of a query record

use docnav_common::errors::Result;
use docnav_common::models::{FilterMode, FilterPass, QaRecord, RecordOutcome};

/// Render `record` as markdown followed by a machine-readable JSON dump
pub fn render_markdown(record: &QaRecord) -> Result<String> {
    let mut out = String::new();

    out.push_str("# QA Record\n\n");
    out.push_str(&format!("**Query ID**: `{}`\n", record.query_id));
    out.push_str(&format!(
        "**Started**: {}\n",
        record.started_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
    ));
    if let Some(finished) = record.finished_at {
        out.push_str(&format!(
            "**Duration**: {} ms\n",
            (finished - record.started_at).num_milliseconds()
        ));
    }
    out.push_str(&format!("**Outcome**: {}\n\n", outcome_label(record.outcome)));

    if let Some(raw) = &record.raw_input {
        out.push_str("## User Input\n\n");
        push_fenced(&mut out, raw);
    }

    if let Some(parsed) = &record.parsed_input {
        out.push_str("## Parsed Input\n\n");
        out.push_str(&format!("- **Question**: {}\n", parsed.question));
        out.push_str(&format!("- **Document**: `{}`\n", parsed.document_path));
        out.push_str(&format!("- **Reasoning**: {}\n\n", parsed.reasoning));
    }

    out.push_str("## Question\n\n");
    out.push_str(&format!("{}\n\n", record.question));

    out.push_str("## Document\n\n");
    out.push_str(&format!("- **Path**: `{}`\n", record.document_path));
    if let Some(doc) = &record.document {
        out.push_str(&format!("- **Characters**: {}\n", doc.char_count));
        out.push_str(&format!("- **Estimated tokens**: {}\n", doc.token_estimate));
        out.push_str(&format!("- **SHA-256**: `{}`\n", doc.fingerprint));
    }
    out.push_str(&format!("- **Chunks created**: {}\n", record.chunk_tree.len()));
    out.push_str(&format!(
        "- **Oversized chunks**: {}\n",
        record.chunk_tree.oversized_count()
    ));
    out.push_str(&format!(
        "- **Failed filter batches**: {}\n\n",
        record.parse_failure_count()
    ));

    if !record.chunk_tree.is_empty() {
        out.push_str("## Chunks\n\n");
        out.push_str("| ID | Depth | Parent | Range | Tokens | Preview |\n");
        out.push_str("|----|-------|--------|-------|--------|---------|\n");
        for chunk in record.chunk_tree.iter() {
            let parent = chunk
                .parent_id
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let mut tokens = chunk.token_estimate.to_string();
            if chunk.oversized {
                tokens.push_str(" (oversized)");
            }
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                chunk.id,
                chunk.depth,
                parent,
                chunk.char_range,
                tokens,
                table_cell(&preview(&chunk.text, 40))
            ));
        }
        out.push('\n');
    }

    let mut fine_index = 0;
    for pass in &record.passes {
        let title = match pass.mode {
            FilterMode::Coarse => "## Coarse Filter".to_string(),
            FilterMode::Fine => {
                fine_index += 1;
                format!("## Fine Filter {} (depth {})", fine_index, pass.depth)
            }
        };
        push_pass(&mut out, &title, pass);
    }

    out.push_str("## Final Fragments\n\n");
    if let Some(reason) = record.stop_reason {
        out.push_str(&format!("**Stop reason**: {}\n\n", reason.describe()));
    }
    if record.final_fragments.is_empty() {
        out.push_str("_None_\n\n");
    }
    for chunk in record.chunk_tree.resolve(record.final_fragments.ids()) {
        out.push_str(&format!(
            "### Fragment {} (depth {}, {})\n\n",
            chunk.id, chunk.depth, chunk.char_range
        ));
        push_fenced(&mut out, &chunk.text);
    }

    if let Some(answer) = &record.answer {
        out.push_str("## Answer\n\n");
        push_fenced(&mut out, &answer.text);
        out.push_str(&format!(
            "**Cited fragments**: {}\n\n",
            id_list(&answer.cited_fragment_ids)
        ));
    }
    if !record.citation_violations.is_empty() {
        out.push_str(&format!(
            "**Dropped citations** (not among the fragments): {}\n\n",
            id_list(&record.citation_violations)
        ));
    }

    if let Some(verification) = &record.verification {
        out.push_str("## Verification\n\n");
        out.push_str(&format!(
            "**Verdict**: {}\n\n",
            if verification.is_correct { "correct" } else { "not confirmed" }
        ));
        out.push_str(&format!("**Reasoning**: {}\n\n", verification.reasoning));
    }

    if !record.stages.is_empty() {
        out.push_str("## Timings\n\n");
        out.push_str("| Stage | Started | Elapsed (ms) |\n");
        out.push_str("|-------|---------|--------------|\n");
        for stage in &record.stages {
            out.push_str(&format!(
                "| {:?} | {} | {} |\n",
                stage.stage,
                stage.started_at.format("%H:%M:%S%.3f"),
                stage.elapsed_ms()
            ));
        }
        out.push('\n');
    }

    if let Some(error) = &record.error {
        out.push_str("## Error\n\n");
        push_fenced(&mut out, error);
    }

    out.push_str("## Raw Record\n\n```json\n");
    out.push_str(&serde_json::to_string_pretty(record)?);
    out.push_str("\n```\n");

    Ok(out)
}

fn push_pass(out: &mut String, title: &str, pass: &FilterPass) {
    out.push_str(&format!("{}\n\n", title));
    out.push_str(&format!(
        "Candidates: {}, selected: {}, elapsed: {} ms\n\n",
        pass.candidate_ids.len(),
        pass.selected.len(),
        (pass.finished_at - pass.started_at).num_milliseconds()
    ));

    if !pass.verdicts.is_empty() {
        out.push_str("| Chunk | Relevant | Score | Reasoning |\n");
        out.push_str("|-------|----------|-------|-----------|\n");
        for verdict in &pass.verdicts {
            let mark = match (verdict.is_relevant, verdict.parse_failure) {
                (_, true) => "parse failure",
                (true, false) => "yes",
                (false, false) => "no",
            };
            out.push_str(&format!(
                "| {} | {} | {:.2} | {} |\n",
                verdict.chunk_id,
                mark,
                verdict.relevance,
                table_cell(&verdict.reasoning)
            ));
        }
        out.push('\n');
    }

    if !pass.carried.is_empty() {
        out.push_str(&format!(
            "Carried forward without splitting: {}\n\n",
            id_list(&pass.carried)
        ));
    }
    if !pass.retained_parents.is_empty() {
        out.push_str(&format!(
            "Parents kept because the pass selected nothing: {}\n\n",
            id_list(&pass.retained_parents)
        ));
    }

    for note in pass.notes.iter().filter(|n| !n.scratchpad.trim().is_empty()) {
        out.push_str(&format!(
            "**Scratchpad (batch {}, chunks {})**\n\n",
            note.batch,
            id_list(&note.chunk_ids)
        ));
        push_fenced(out, &note.scratchpad);
    }

    for failure in &pass.failures {
        out.push_str(&format!(
            "**Batch {} failed** (chunks {}): {}\n\n",
            failure.batch,
            id_list(&failure.chunk_ids),
            failure.message
        ));
    }
}

fn outcome_label(outcome: Option<RecordOutcome>) -> &'static str {
    match outcome {
        Some(RecordOutcome::Answered) => "answered",
        Some(RecordOutcome::NoRelevantContent) => "no relevant content",
        Some(RecordOutcome::Failed) => "failed",
        None => "in progress",
    }
}

fn push_fenced(out: &mut String, text: &str) {
    let fence = if text.contains("```") { "````" } else { "```" };
    out.push_str(&format!("{}\n{}\n{}\n\n", fence, text.trim_end(), fence));
}

fn id_list(ids: &[usize]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut preview: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        preview.push('…');
    }
    preview
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docnav_common::models::{
        Answer, BatchFailure, CharRange, ChunkTree, FilterVerdict, FragmentSet, Segment, StopReason,
        VerificationResult,
    };

    fn record() -> QaRecord {
        let mut record = QaRecord::begin("付款期限？", "/docs/contract.txt");
        let mut tree = ChunkTree::new();
        tree.insert_segments(
            0,
            None,
            vec![Segment {
                char_range: CharRange::new(0, 14),
                text: "甲方应于收货后三十日内付款。".to_string(),
                token_estimate: 14,
                oversized: false,
            }],
        );
        record.final_fragments = FragmentSet::from_ids(vec![0], &tree);
        record.push_pass(FilterPass {
            depth: 0,
            mode: FilterMode::Coarse,
            candidate_ids: vec![0],
            verdicts: vec![FilterVerdict::new(0, true, 0.8, "states | the deadline".to_string())],
            selected: record.final_fragments.clone(),
            retained_parents: Vec::new(),
            carried: Vec::new(),
            notes: Vec::new(),
            failures: vec![BatchFailure {
                batch: 1,
                chunk_ids: vec![7],
                message: "timed out".to_string(),
            }],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        });
        record.chunk_tree = tree;
        record.stop_reason = Some(StopReason::Granularity);
        record.answer = Some(Answer {
            text: "收货后三十日内 [#0]".to_string(),
            cited_fragment_ids: vec![0],
        });
        record.citation_violations = vec![5];
        record.verification = Some(VerificationResult {
            is_correct: true,
            reasoning: "supported".to_string(),
        });
        record.finish(RecordOutcome::Answered);
        record
    }

    #[test]
    fn test_sections_are_rendered() {
        let md = render_markdown(&record()).unwrap();

        assert!(md.starts_with("# QA Record"));
        assert!(md.contains("**Outcome**: answered"));
        assert!(md.contains("## Coarse Filter"));
        assert!(md.contains("| 0 | yes | 0.80 | states \\| the deadline |"));
        assert!(md.contains("**Batch 1 failed** (chunks 7): timed out"));
        assert!(md.contains("- **Failed filter batches**: 1"));
        assert!(md.contains("### Fragment 0 (depth 0, [0, 14))"));
        assert!(md.contains("**Cited fragments**: 0"));
        assert!(md.contains("**Dropped citations** (not among the fragments): 5"));
        assert!(md.contains("**Verdict**: correct"));
        assert!(md.contains(StopReason::Granularity.describe()));
    }

    #[test]
    fn test_json_dump_round_trips() {
        let md = render_markdown(&record()).unwrap();
        let start = md.find("```json\n").unwrap() + "```json\n".len();
        let end = md.rfind("\n```").unwrap();
        let parsed: QaRecord = serde_json::from_str(&md[start..end]).unwrap();
        assert_eq!(parsed.question, "付款期限？");
        assert_eq!(parsed.final_fragments.ids(), &[0]);
    }
}
