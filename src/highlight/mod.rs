//! Snippet synthesis
//!
//! For a matched document, locate every occurrence of the query terms
//! (ASCII-case-insensitive over the raw text), expand each hit by a fixed
//! context window, align window edges to word-character boundaries, merge
//! overlaps, rank windows by hit density then start offset, and emit up to a
//! fixed number of snippets. All coordinates are char indices.

use crate::config::{MAX_SNIPPETS, SNIPPET_CONTEXT_CHARS};

/// Half-open highlight range in snippet-relative char coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HighlightSpan {
    pub start: usize,
    pub end: usize,
}

/// One context window around query hits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snippet {
    pub text: String,
    /// 1-based line of the first highlight (newlines before the anchor + 1)
    pub line_number: usize,
    /// Char offset of the window start within the document
    pub offset: usize,
    pub highlights: Vec<HighlightSpan>,
}

#[derive(Clone, Copy)]
struct Window {
    start: usize,
    end: usize,
    hit_count: usize,
}

pub struct SnippetGenerator {
    context_chars: usize,
    max_snippets: usize,
}

impl Default for SnippetGenerator {
    fn default() -> Self {
        Self::new(SNIPPET_CONTEXT_CHARS, MAX_SNIPPETS)
    }
}

impl SnippetGenerator {
    pub fn new(context_chars: usize, max_snippets: usize) -> Self {
        Self {
            context_chars,
            max_snippets: max_snippets.max(1),
        }
    }

    /// Generate snippets for `content` given lowercased query terms and
    /// optional raw hit offsets (char ranges) supplied by the caller.
    pub fn generate(
        &self,
        content: &str,
        query_terms: &[String],
        hit_offsets: &[(usize, usize)],
    ) -> Vec<Snippet> {
        if content.is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = content.chars().collect();

        let hits = self.collect_hits(&chars, query_terms, hit_offsets);
        if hits.is_empty() {
            return Vec::new();
        }

        let mut windows = self.build_merged_windows(&chars, &hits);
        windows.sort_by(|a, b| {
            b.hit_count
                .cmp(&a.hit_count)
                .then_with(|| a.start.cmp(&b.start))
        });

        windows
            .into_iter()
            .take(self.max_snippets)
            .map(|window| {
                let text: String = chars[window.start..window.end].iter().collect();
                let highlights = relative_highlights(window.start, window.end, &hits);
                let anchor = window.start + highlights.first().map(|h| h.start).unwrap_or(0);
                Snippet {
                    text,
                    line_number: line_number_at(&chars, anchor),
                    offset: window.start,
                    highlights,
                }
            })
            .collect()
    }

    fn collect_hits(
        &self,
        chars: &[char],
        query_terms: &[String],
        hit_offsets: &[(usize, usize)],
    ) -> Vec<HighlightSpan> {
        let mut spans = Vec::new();
        for &(start, end) in hit_offsets {
            let end = end.min(chars.len());
            if start < end {
                spans.push(HighlightSpan { start, end });
            }
        }

        let lower: Vec<char> = chars
            .iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        for term in query_terms {
            let needle: Vec<char> = term.chars().map(|c| c.to_ascii_lowercase()).collect();
            if needle.is_empty() || needle.len() > lower.len() {
                continue;
            }
            let mut from = 0usize;
            while from + needle.len() <= lower.len() {
                if lower[from..from + needle.len()] == needle[..] {
                    spans.push(HighlightSpan {
                        start: from,
                        end: from + needle.len(),
                    });
                    from += needle.len();
                } else {
                    from += 1;
                }
            }
        }
        merge_spans(spans)
    }

    fn build_merged_windows(&self, chars: &[char], hits: &[HighlightSpan]) -> Vec<Window> {
        let mut windows: Vec<Window> = hits
            .iter()
            .map(|span| {
                let raw_start = span.start.saturating_sub(self.context_chars);
                let raw_end = (span.end + self.context_chars).min(chars.len());
                Window {
                    start: align_start(chars, raw_start),
                    end: align_end(chars, raw_end),
                    hit_count: 1,
                }
            })
            .collect();
        windows.sort_by_key(|w| w.start);

        let mut merged: Vec<Window> = Vec::new();
        for window in windows {
            match merged.last_mut() {
                Some(previous) if window.start <= previous.end => {
                    previous.end = previous.end.max(window.end);
                    previous.hit_count += 1;
                }
                _ => merged.push(window),
            }
        }
        merged
    }
}

fn relative_highlights(
    window_start: usize,
    window_end: usize,
    hits: &[HighlightSpan],
) -> Vec<HighlightSpan> {
    let spans = hits
        .iter()
        .filter(|span| span.end > window_start && span.start < window_end)
        .map(|span| HighlightSpan {
            start: span.start.max(window_start) - window_start,
            end: span.end.min(window_end) - window_start,
        })
        .collect();
    merge_spans(spans)
}

fn align_start(chars: &[char], mut index: usize) -> usize {
    while index > 0 && is_word_char(chars[index - 1]) {
        index -= 1;
    }
    index
}

fn align_end(chars: &[char], mut index: usize) -> usize {
    while index < chars.len() && is_word_char(chars[index]) {
        index += 1;
    }
    index
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn line_number_at(chars: &[char], offset: usize) -> usize {
    1 + chars[..offset.min(chars.len())]
        .iter()
        .filter(|&&c| c == '\n')
        .count()
}

fn merge_spans(mut spans: Vec<HighlightSpan>) -> Vec<HighlightSpan> {
    if spans.is_empty() {
        return spans;
    }
    spans.sort_by_key(|s| s.start);
    let mut merged = Vec::with_capacity(spans.len());
    let mut current = spans[0];
    for span in spans.into_iter().skip(1) {
        if span.start <= current.end {
            current.end = current.end.max(span.end);
        } else {
            merged.push(current);
            current = span;
        }
    }
    merged.push(current);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_basic_snippet() {
        let generator = SnippetGenerator::new(10, 3);
        let content = "The quick brown fox jumps over the lazy dog near the river bank";
        let snippets = generator.generate(content, &terms(&["fox"]), &[]);
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].text.contains("fox"));
        let span = snippets[0].highlights[0];
        let text_chars: Vec<char> = snippets[0].text.chars().collect();
        let highlighted: String = text_chars[span.start..span.end].iter().collect();
        assert_eq!(highlighted, "fox");
    }

    #[test]
    fn test_case_insensitive_matching() {
        let generator = SnippetGenerator::new(10, 3);
        let snippets = generator.generate("Delete THIS file", &terms(&["delete"]), &[]);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].highlights[0], HighlightSpan { start: 0, end: 6 });
    }

    #[test]
    fn test_overlapping_windows_merge() {
        let generator = SnippetGenerator::new(20, 3);
        let content = "alpha beta gamma delta epsilon";
        let snippets = generator.generate(content, &terms(&["beta", "delta"]), &[]);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].highlights.len(), 2);
    }

    #[test]
    fn test_window_ranked_by_density() {
        let generator = SnippetGenerator::new(5, 3);
        let content = format!(
            "needle{}needle needle{}end",
            " filler ".repeat(10),
            " x ".repeat(1)
        );
        let snippets = generator.generate(&content, &terms(&["needle"]), &[]);
        assert!(!snippets.is_empty());
        // The denser window (two hits) is ranked first
        assert!(snippets[0].highlights.len() >= 2);
    }

    #[test]
    fn test_line_numbers() {
        let generator = SnippetGenerator::new(5, 3);
        let content = "first line\nsecond line\nthird target line\n";
        let snippets = generator.generate(content, &terms(&["target"]), &[]);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].line_number, 3);
    }

    #[test]
    fn test_snippet_cap() {
        let generator = SnippetGenerator::new(2, 3);
        let content = (0..10)
            .map(|i| format!("hit {}", "pad".repeat(20 + i)))
            .collect::<Vec<_>>()
            .join(" ");
        let snippets = generator.generate(&content, &terms(&["hit"]), &[]);
        assert!(snippets.len() <= 3);
    }

    #[test]
    fn test_no_match_no_snippets() {
        let generator = SnippetGenerator::default();
        assert!(generator
            .generate("some content", &terms(&["absent"]), &[])
            .is_empty());
        assert!(generator.generate("", &terms(&["x"]), &[]).is_empty());
    }

    #[test]
    fn test_explicit_hit_offsets() {
        let generator = SnippetGenerator::new(3, 3);
        let snippets = generator.generate("abcdef ghijkl", &[], &[(7, 13)]);
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].text.contains("ghijkl"));
    }
}
