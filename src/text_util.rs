use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    TextAnalyzer,
};

/// Number of lines in an excerpt when no query term is found.
pub const DEFAULT_SNIPPET_LINES: usize = 6;

/// Maximum number of characters in an excerpt before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 400;

/// English analyzer: split on non-alphanumerics, drop very long tokens,
/// lowercase, stem.
fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Stemmed, lowercased tokens of `text`, in order, duplicates kept.
///
/// # Examples
///
/// ```
/// use docfinder::text_util::tokenize;
///
/// assert_eq!(tokenize("Budget Reports"), vec!["budget", "report"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}

/// Prepend line numbers to each line of text.
///
/// `start_line` is the number to assign to the first line (1-indexed).
pub fn add_line_numbers(text: &str, start_line: usize) -> String {
    let width = (start_line + text.lines().count()).to_string().len();
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{:>width$}  {line}", start_line + i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Excerpt of `text` around the first line containing any whitespace
/// separated term of `query` (case-insensitive).
///
/// Falls back to the first few lines when nothing matches. Returns `None`
/// for blank text.
pub fn extract_snippet(text: &str, query: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return None;
    }

    let terms: Vec<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    let match_idx = lines.iter().position(|line| {
        let line = line.to_lowercase();
        terms.iter().any(|t| line.contains(t.as_str()))
    });

    let (start, end) = match match_idx {
        Some(idx) => (idx.saturating_sub(2), (idx + 3).min(lines.len())),
        None => (0, DEFAULT_SNIPPET_LINES.min(lines.len())),
    };

    let snippet = lines[start..end].join("\n");
    Some(truncate_chars(snippet.trim(), DEFAULT_SNIPPET_MAX_CHARS))
}

/// Cut `text` to at most `max` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Apply line offset and optional line limit to a block of text.
///
/// `start_line` is 1-indexed. If `max_lines` is `Some(n)`, at most `n` lines
/// are returned with a truncation notice appended.
pub fn apply_line_limits(
    text: &str,
    start_line: usize,
    max_lines: Option<usize>,
) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start_idx = start_line.saturating_sub(1);
    if start_idx >= lines.len() {
        return String::new();
    }

    let end_idx = max_lines
        .map(|max| (start_idx + max).min(lines.len()))
        .unwrap_or(lines.len());

    let mut slice = lines[start_idx..end_idx].join("\n");
    if end_idx < lines.len() {
        slice.push_str(&format!(
            "\n\n[... truncated {} more lines]",
            lines.len() - end_idx
        ));
    }
    slice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_stems_and_lowercases() {
        assert_eq!(tokenize("Revenue REVENUES"), vec!["revenu", "revenu"]);
        assert_eq!(tokenize("Q4 revenue $5M"), vec!["q4", "revenu", "5m"]);
    }

    #[test]
    fn tokenize_drops_punctuation_and_long_tokens() {
        let long = "x".repeat(60);
        assert_eq!(tokenize(&format!("hello, {long}!")), vec!["hello"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn add_line_numbers_pads() {
        assert_eq!(add_line_numbers("foo\nbar", 1), "1  foo\n2  bar");
        assert_eq!(add_line_numbers("foo\nbar", 9), " 9  foo\n10  bar");
    }

    #[test]
    fn extract_snippet_match_found() {
        let text = "line1\nline2\nline3\nrust is great\nline5\nline6\nline7";
        let snippet = extract_snippet(text, "RUST").unwrap();
        assert!(snippet.starts_with("line2"));
        assert!(snippet.contains("rust is great"));
        assert!(!snippet.contains("line7"));
    }

    #[test]
    fn extract_snippet_any_term_matches() {
        let text = "intro\nthe budget is set\noutro";
        let snippet = extract_snippet(text, "annual budget").unwrap();
        assert!(snippet.contains("budget is set"));
    }

    #[test]
    fn extract_snippet_no_match_returns_head() {
        let text = "line1\nline2\nline3\nline4\nline5\nline6\nline7\nline8";
        let snippet = extract_snippet(text, "zzz_nomatch").unwrap();
        assert!(snippet.starts_with("line1"));
        assert!(snippet.ends_with("line6"));
    }

    #[test]
    fn extract_snippet_blank_text() {
        assert!(extract_snippet("", "query").is_none());
        assert!(extract_snippet("\n  \n", "query").is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(500);
        let snippet = extract_snippet(&text, "é").unwrap();
        assert_eq!(snippet.chars().count(), DEFAULT_SNIPPET_MAX_CHARS + 3);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn apply_line_limits_full_text() {
        let text = "line1\nline2\nline3";
        assert_eq!(apply_line_limits(text, 1, None), text);
    }

    #[test]
    fn apply_line_limits_offset_and_max() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let result = apply_line_limits(text, 2, Some(2));
        assert!(result.starts_with("line2\nline3"));
        assert!(result.contains("truncated 2 more lines"));
    }

    #[test]
    fn apply_line_limits_past_end() {
        assert!(apply_line_limits("line1\nline2", 100, None).is_empty());
    }
}
