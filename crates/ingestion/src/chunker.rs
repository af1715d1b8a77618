//! Text segmentation module
//!
//! Splits text into ordered chunks that always end on a sentence boundary:
//! - sentence units are cut after CJK terminators (`。！？…；`), Western
//!   terminators followed by whitespace, or paragraph breaks
//! - consecutive units are packed greedily under a token budget
//! - a unit larger than the budget becomes its own oversized chunk
//!
//! All positions are character (not byte) offsets. Sub-segmentation of a
//! chunk passes the chunk's start as `base_offset`, so ranges stay
//! document-global.

use docnav_common::models::{CharRange, Chunk, Segment};
use tracing::{debug, warn};

/// Sentence boundary rule set
#[derive(Debug, Clone)]
pub struct BoundaryRules {
    /// Full-width terminators, a boundary wherever they occur
    pub cjk_terminators: Vec<char>,

    /// Half-width terminators, a boundary only before whitespace, CJK text or end of text
    pub western_terminators: Vec<char>,

    /// Closing quotes and brackets that stay with the sentence they close
    pub closing_marks: Vec<char>,

    /// Treat a single line break as a paragraph break (otherwise a blank line is needed)
    pub newline_is_paragraph: bool,
}

impl Default for BoundaryRules {
    fn default() -> Self {
        Self {
            cjk_terminators: vec!['。', '！', '？', '…', '；'],
            western_terminators: vec!['.', '!', '?'],
            closing_marks: vec!['”', '’', '」', '』', '）', '》', '】', '"', '\'', ')', ']'],
            newline_is_paragraph: false,
        }
    }
}

impl BoundaryRules {
    fn is_terminator(&self, c: char) -> bool {
        self.cjk_terminators.contains(&c) || self.western_terminators.contains(&c)
    }

    /// Split `chars` into contiguous sentence units covering the whole input
    pub fn sentence_units(&self, chars: &[char]) -> Vec<CharRange> {
        let n = chars.len();
        let mut units = Vec::new();
        let mut start = 0;
        let mut i = 0;

        while i < n {
            let c = chars[i];
            let boundary = if self.cjk_terminators.contains(&c) {
                Some(skip_whitespace(chars, self.terminator_run_end(chars, i)))
            } else if self.western_terminators.contains(&c) {
                let end = self.terminator_run_end(chars, i);
                let closes_sentence =
                    end == n || chars[end].is_whitespace() || is_cjk(chars[end]);
                closes_sentence.then(|| skip_whitespace(chars, end))
            } else if c == '\n' {
                self.paragraph_break_end(chars, i)
            } else {
                None
            };

            match boundary {
                Some(end) => {
                    units.push(CharRange::new(start, end));
                    start = end;
                    i = end;
                }
                None => i += 1,
            }
        }

        if start < n {
            units.push(CharRange::new(start, n));
        }
        units
    }

    /// End of a run of terminators plus any closing marks after it
    fn terminator_run_end(&self, chars: &[char], from: usize) -> usize {
        let mut j = from;
        while j < chars.len() && self.is_terminator(chars[j]) {
            j += 1;
        }
        while j < chars.len() && self.closing_marks.contains(&chars[j]) {
            j += 1;
        }
        j
    }

    fn paragraph_break_end(&self, chars: &[char], newline: usize) -> Option<usize> {
        if self.newline_is_paragraph {
            return Some(skip_whitespace(chars, newline));
        }
        let mut k = newline + 1;
        let mut blank_line = false;
        while k < chars.len() && chars[k].is_whitespace() {
            blank_line |= chars[k] == '\n';
            k += 1;
        }
        blank_line.then_some(k)
    }
}

fn skip_whitespace(chars: &[char], from: usize) -> usize {
    let mut j = from;
    while j < chars.len() && chars[j].is_whitespace() {
        j += 1;
    }
    j
}

/// CJK ideographs, kana, hangul and full-width punctuation
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3000..=0x303F   // CJK symbols and punctuation
        | 0x3040..=0x30FF // Hiragana, Katakana
        | 0x3400..=0x4DBF // CJK Extension A
        | 0x4E00..=0x9FFF // CJK Unified Ideographs
        | 0xAC00..=0xD7AF // Hangul syllables
        | 0xF900..=0xFAFF // CJK compatibility ideographs
        | 0xFF00..=0xFFEF // Half/full-width forms
        | 0x20000..=0x2FA1F // Extensions B-F, compatibility supplement
    )
}

/// How tokens are approximated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimationMode {
    /// One token per non-whitespace character
    CharBased,
    /// Four tokens per three words; every CJK character counts as a word
    WordBased,
}

/// Deterministic, language-aware token approximation
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    mode: EstimationMode,
}

/// Share of CJK among non-whitespace characters that makes text CJK-dominant
const CJK_DOMINANCE: f64 = 0.5;

impl TokenEstimator {
    /// Pick the mode from the script mix of `text`
    pub fn for_text(text: &str) -> Self {
        let (mut cjk, mut total) = (0usize, 0usize);
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            total += 1;
            if is_cjk(c) {
                cjk += 1;
            }
        }
        let mode = if total > 0 && cjk as f64 / total as f64 >= CJK_DOMINANCE {
            EstimationMode::CharBased
        } else {
            EstimationMode::WordBased
        };
        Self { mode }
    }

    pub fn mode(&self) -> EstimationMode {
        self.mode
    }

    pub fn estimate(&self, text: &str) -> usize {
        match self.mode {
            EstimationMode::CharBased => text.chars().filter(|c| !c.is_whitespace()).count(),
            EstimationMode::WordBased => {
                let words = count_words(text);
                (words * 4 + 2) / 3
            }
        }
    }
}

fn count_words(text: &str) -> usize {
    let mut words = 0;
    let mut in_word = false;
    for c in text.chars() {
        if is_cjk(c) {
            words += 1;
            in_word = false;
        } else if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            words += 1;
            in_word = true;
        }
    }
    words
}

/// Estimate tokens of free text with an auto-detected mode
pub fn estimate_tokens(text: &str) -> usize {
    TokenEstimator::for_text(text).estimate(text)
}

/// Boundary-respecting greedy packer
#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    rules: BoundaryRules,
}

impl Segmenter {
    pub fn new(rules: BoundaryRules) -> Self {
        Self { rules }
    }

    /// Split `text` into segments of at most `token_budget` estimated tokens,
    /// never cutting inside a sentence unit. Ranges are shifted by `base_offset`.
    pub fn segment(&self, text: &str, token_budget: usize, base_offset: usize) -> Vec<Segment> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let estimator = TokenEstimator::for_text(text);
        let units = self.rules.sentence_units(&chars);
        let budget = token_budget.max(1);

        let mut segments = Vec::new();
        let mut current: Option<CharRange> = None;
        let mut current_tokens = 0usize;

        for unit in units {
            let unit_text: String = chars[unit.start..unit.end].iter().collect();
            let unit_tokens = estimator.estimate(&unit_text);

            if let Some(range) = current {
                if current_tokens + unit_tokens > budget {
                    segments.push(self.build(&chars, range, current_tokens, budget, base_offset));
                    current = None;
                    current_tokens = 0;
                }
            }

            current = Some(match current {
                Some(range) => CharRange::new(range.start, unit.end),
                None => unit,
            });
            current_tokens += unit_tokens;
        }

        if let Some(range) = current {
            segments.push(self.build(&chars, range, current_tokens, budget, base_offset));
        }

        debug!(
            input_chars = chars.len(),
            segment_count = segments.len(),
            token_budget = budget,
            mode = ?estimator.mode(),
            "Text segmented"
        );

        segments
    }

    /// Re-split an existing chunk at a finer budget
    pub fn segment_chunk(&self, chunk: &Chunk, token_budget: usize) -> Vec<Segment> {
        self.segment(&chunk.text, token_budget, chunk.char_range.start)
    }

    fn build(
        &self,
        chars: &[char],
        range: CharRange,
        tokens: usize,
        budget: usize,
        base_offset: usize,
    ) -> Segment {
        let oversized = tokens > budget;
        let char_range = range.offset(base_offset);
        if oversized {
            warn!(
                range = %char_range,
                tokens,
                budget,
                "Sentence unit exceeds token budget, keeping it as an oversized chunk"
            );
        }
        Segment {
            char_range,
            text: chars[range.start..range.end].iter().collect(),
            token_estimate: tokens,
            oversized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ends(segments: &[Segment]) -> Vec<usize> {
        segments.iter().map(|s| s.char_range.end).collect()
    }

    #[test]
    fn test_three_sentences_fit_one_chunk() {
        let segments = Segmenter::default().segment("A。B。C。", 1000, 0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].char_range, CharRange::new(0, 6));
        assert_eq!(segments[0].text, "A。B。C。");
        assert!(!segments[0].oversized);
    }

    #[test]
    fn test_partition_is_contiguous_and_complete() {
        let text = "第一条 合同双方应当遵守约定。第二条 违约方应承担赔偿责任！\n\n第三条 争议解决？协商不成的，提交仲裁…最后一句没有句号";
        let total = text.chars().count();
        let segments = Segmenter::default().segment(text, 12, 0);

        assert!(segments.len() > 1);
        assert_eq!(segments[0].char_range.start, 0);
        assert_eq!(segments.last().unwrap().char_range.end, total);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].char_range.end, pair[1].char_range.start);
        }
        let rebuilt: String = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_chunks_end_on_sentence_units() {
        let text = "Revenue grew 3.5 percent. Costs fell! Margins? They widened.\n\nNew paragraph without stop";
        let chars: Vec<char> = text.chars().collect();
        let rules = BoundaryRules::default();
        let unit_ends: Vec<usize> = rules.sentence_units(&chars).iter().map(|u| u.end).collect();

        let segments = Segmenter::default().segment(text, 4, 0);
        for end in ends(&segments) {
            assert!(unit_ends.contains(&end), "chunk ends mid-sentence at {}", end);
        }
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        let chars: Vec<char> = "Pi is 3.14 roughly. Done.".chars().collect();
        let units = BoundaryRules::default().sentence_units(&chars);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], CharRange::new(0, 20));
    }

    #[test]
    fn test_closing_quote_stays_with_sentence() {
        let chars: Vec<char> = "他说：“好。”然后离开。".chars().collect();
        let units = BoundaryRules::default().sentence_units(&chars);
        assert_eq!(units.len(), 2);
        let first: String = chars[units[0].start..units[0].end].iter().collect();
        assert_eq!(first, "他说：“好。”");
    }

    #[test]
    fn test_blank_line_is_paragraph_break() {
        let chars: Vec<char> = "标题一\n\n正文内容\n续行".chars().collect();
        let units = BoundaryRules::default().sentence_units(&chars);
        assert_eq!(units.len(), 2);

        let rules = BoundaryRules {
            newline_is_paragraph: true,
            ..BoundaryRules::default()
        };
        assert_eq!(rules.sentence_units(&chars).len(), 3);
    }

    #[test]
    fn test_oversized_unit_is_its_own_chunk() {
        let long = "这是一个非常长的没有任何终止符的段落".repeat(5);
        let text = format!("短句。{}。尾句。", long);
        let segments = Segmenter::default().segment(&text, 10, 0);

        assert_eq!(segments.len(), 3);
        assert!(!segments[0].oversized);
        assert!(segments[1].oversized);
        assert!(segments[1].token_estimate > 10);
        assert!(!segments[2].oversized);
    }

    #[test]
    fn test_segmentation_is_idempotent() {
        let text = "Alpha beta gamma. Delta epsilon! Zeta eta theta iota? Kappa.".repeat(10);
        let segmenter = Segmenter::default();
        assert_eq!(segmenter.segment(&text, 15, 0), segmenter.segment(&text, 15, 0));
    }

    #[test]
    fn test_base_offset_makes_ranges_global() {
        let segments = Segmenter::default().segment("甲。乙。", 1, 100);
        assert_eq!(segments[0].char_range, CharRange::new(100, 102));
        assert_eq!(segments[1].char_range, CharRange::new(102, 104));
    }

    #[test]
    fn test_empty_text() {
        assert!(Segmenter::default().segment("", 100, 0).is_empty());
    }

    #[test]
    fn test_token_estimator_modes() {
        let zh = TokenEstimator::for_text("合同双方应当遵守约定");
        assert_eq!(zh.mode(), EstimationMode::CharBased);
        assert_eq!(zh.estimate("合同 双方"), 4);

        let en = TokenEstimator::for_text("the quick brown fox");
        assert_eq!(en.mode(), EstimationMode::WordBased);
        // 3 words -> 4 tokens
        assert_eq!(en.estimate("one two three"), 4);
        assert_eq!(estimate_tokens(""), 0);
    }
}
