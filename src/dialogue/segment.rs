//! Streaming reply segmentation.
//!
//! Accumulates incrementally-arriving text deltas and emits completed,
//! sentence-bounded spoken units in order. The boundary is sentence-terminal
//! punctuation with optional trailing whitespace; decimal numbers and
//! abbreviations are not special-cased, so "3.14" fragments (a known
//! limitation carried over from the sentence regex this replaces).

use std::sync::OnceLock;

use regex::Regex;

/// Longest single spoken segment, in characters.
const MAX_SEGMENT_CHARS: usize = 3_000;

struct SpokenNormalizer {
    code_block: Regex,
    inline_code: Regex,
    link: Regex,
    bold: Regex,
    italic: Regex,
    whitespace: Regex,
}

fn normalizer() -> &'static SpokenNormalizer {
    static NORMALIZER: OnceLock<SpokenNormalizer> = OnceLock::new();
    NORMALIZER.get_or_init(|| SpokenNormalizer {
        code_block: Regex::new(r"```[\s\S]*?```").unwrap(),
        inline_code: Regex::new(r"`[^`]+`").unwrap(),
        link: Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap(),
        bold: Regex::new(r"\*\*([^*]+)\*\*").unwrap(),
        italic: Regex::new(r"\*([^*]+)\*").unwrap(),
        whitespace: Regex::new(r"\s+").unwrap(),
    })
}

fn sentence_end() -> &'static Regex {
    static SENTENCE_END: OnceLock<Regex> = OnceLock::new();
    SENTENCE_END.get_or_init(|| Regex::new(r"[.!?]+\s*").unwrap())
}

/// Normalize a sentence for the spoken-output sink: strip markdown markers
/// and link syntax, collapse whitespace, cap length. `None` when nothing
/// speakable remains.
pub fn normalize_spoken(text: &str) -> Option<String> {
    let n = normalizer();
    let text = n.code_block.replace_all(text, " ");
    let text = n.inline_code.replace_all(&text, " ");
    let text = n.link.replace_all(&text, "$1");
    let text = n.bold.replace_all(&text, "$1");
    let text = n.italic.replace_all(&text, "$1");
    let text = n.whitespace.replace_all(&text, " ");
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().count() > MAX_SEGMENT_CHARS {
        return Some(text.chars().take(MAX_SEGMENT_CHARS).collect());
    }
    Some(text.to_string())
}

/// Converts an incrementally arriving text stream into ordered,
/// sentence-bounded spoken units.
#[derive(Default)]
pub struct ResponseSegmenter {
    pending: String,
}

impl ResponseSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta; return every newly-completed segment, in order.
    /// A segment is complete once its terminating punctuation has arrived.
    pub fn push_delta(&mut self, delta: &str) -> Vec<String> {
        self.pending.push_str(delta);

        let pending = std::mem::take(&mut self.pending);
        let mut segments = Vec::new();
        let mut consumed = 0;
        for m in sentence_end().find_iter(&pending) {
            let mut sentence = pending[consumed..m.start()].to_string();
            sentence.push_str(pending[m.start()..m.end()].trim_end());
            consumed = m.end();
            if let Some(spoken) = normalize_spoken(&sentence) {
                segments.push(spoken);
            }
        }
        self.pending = pending[consumed..].to_string();
        segments
    }

    /// The stream ended: emit the final (possibly unterminated) remainder.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        normalize_spoken(&rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_sentences_in_order_once_terminated() {
        let mut seg = ResponseSegmenter::new();
        assert!(seg.push_delta("Hello").is_empty());
        assert_eq!(seg.push_delta(" world."), vec!["Hello world."]);
        assert!(seg.push_delta(" How are").is_empty());
        assert_eq!(seg.push_delta(" you?"), vec!["How are you?"]);
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn unterminated_stream_yields_single_final_segment() {
        let mut seg = ResponseSegmenter::new();
        assert!(seg.push_delta("Partial thought").is_empty());
        assert_eq!(seg.finish(), Some("Partial thought".to_string()));
        // finish is idempotent once drained
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn multiple_sentences_in_one_delta() {
        let mut seg = ResponseSegmenter::new();
        assert_eq!(seg.push_delta("One. Two! Three"), vec!["One.", "Two!"]);
        assert_eq!(seg.finish(), Some("Three".to_string()));
    }

    #[test]
    fn no_segment_is_duplicated() {
        let mut seg = ResponseSegmenter::new();
        let mut all = seg.push_delta("It is noon.");
        all.extend(seg.push_delta(" Really."));
        all.extend(seg.finish());
        assert_eq!(all, vec!["It is noon.", "Really."]);
    }

    #[test]
    fn strips_markdown_for_speech() {
        let mut seg = ResponseSegmenter::new();
        let out = seg.push_delta("Read [the docs](http://example.com) **now**, *please*.");
        assert_eq!(out, vec!["Read the docs now, please."]);
    }

    #[test]
    fn inline_code_is_dropped() {
        assert_eq!(
            normalize_spoken("run `cargo test` then"),
            Some("run then".to_string())
        );
        assert_eq!(normalize_spoken("```\nlet x = 1;\n```"), None);
    }

    #[test]
    fn decimal_numbers_fragment_at_the_dot() {
        // Known limitation: no decimal/abbreviation special-casing.
        let mut seg = ResponseSegmenter::new();
        let mut all = seg.push_delta("Pi is 3.14.");
        all.extend(seg.finish());
        assert_eq!(all, vec!["Pi is 3.", "14."]);
    }

    #[test]
    fn overlong_segment_is_capped() {
        let long = format!("{}.", "a".repeat(5_000));
        let mut seg = ResponseSegmenter::new();
        let out = seg.push_delta(&long);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chars().count(), MAX_SEGMENT_CHARS);
    }

    #[test]
    fn whitespace_only_remainder_is_not_emitted() {
        let mut seg = ResponseSegmenter::new();
        seg.push_delta("Done.   ");
        assert_eq!(seg.finish(), None);
    }
}
