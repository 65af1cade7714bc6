use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    StopWordFilter,
    TextAnalyzer,
    TokenStream,
};

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 400;

/// Largest message most chat transports accept in one piece.
pub const DEFAULT_MESSAGE_MAX_CHARS: usize = 4000;

/// Name under which [`en_stem_analyzer`] is registered on Tantivy indexes.
pub const EN_STEM: &str = "en_stem";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "did", "do",
    "does", "for", "from", "had", "has", "have", "he", "her", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not",
    "of", "on", "or", "our", "she", "so", "such", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "to", "was", "we",
    "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "you", "your",
];

/// Lowercasing, stopword-removing English stemmer shared by the keyword
/// index, the lexical index and the hashing embedder.
pub fn en_stem_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            STOPWORDS.iter().map(|w| w.to_string()),
        ))
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Run text through [`en_stem_analyzer`], returning terms in order.
///
/// # Examples
///
/// ```
/// use curatex::text_util::analyze;
///
/// assert_eq!(analyze("The Batteries are charging"), vec!["batteri", "charg"]);
/// ```
pub fn analyze(text: &str) -> Vec<String> {
    let mut analyzer = en_stem_analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut terms = Vec::new();
    while stream.advance() {
        terms.push(stream.token().text.clone());
    }
    terms
}

/// Extract a snippet around the first occurrence of any query term.
///
/// Matching is case-insensitive on whole query words longer than two
/// characters. Falls back to the start of the text. Returns `None` for blank
/// text.
pub fn extract_snippet(text: &str, query: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_lowercase();
    let hit = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() > 2)
        .filter_map(|w| lower.find(&w))
        .min();

    // Lowercasing can shift byte offsets for some scripts; only trust the
    // hit when it falls on a boundary of the original text.
    let start_byte = hit
        .filter(|&b| trimmed.is_char_boundary(b))
        .map(|b| {
            let line_start = trimmed[..b].rfind('\n').map_or(0, |i| i + 1);
            line_start.max(b.saturating_sub(DEFAULT_SNIPPET_MAX_CHARS / 4))
        })
        .unwrap_or(0);
    let start_byte = (0..=start_byte)
        .rev()
        .find(|&b| trimmed.is_char_boundary(b))
        .unwrap_or(0);

    let tail = &trimmed[start_byte..];
    let mut snippet: String =
        tail.chars().take(DEFAULT_SNIPPET_MAX_CHARS).collect();
    if tail.chars().count() > DEFAULT_SNIPPET_MAX_CHARS {
        snippet.push_str("...");
    }
    if start_byte > 0 {
        snippet.insert_str(0, "...");
    }

    Some(snippet)
}

/// Split a long answer into parts of at most `max_chars` characters,
/// preferring to break at a newline or space.
///
/// # Examples
///
/// ```
/// use curatex::text_util::split_message;
///
/// assert_eq!(split_message("short", 4000), vec!["short"]);
/// assert_eq!(split_message("aaa bbb", 4), vec!["aaa", "bbb"]);
/// ```
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut parts = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(b, _)| b);
        let window = &rest[..limit];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&b| b > 0)
            .unwrap_or(limit);

        let part = rest[..cut].trim_end();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        rest = rest[cut..].trim_start();
    }

    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}
