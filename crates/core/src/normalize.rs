use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

fn disallowed() -> &'static Regex {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    // \w is Unicode-aware, so Hangul syllables and jamo are kept
    DISALLOWED.get_or_init(|| Regex::new(r"[^\w\s()\[\]{}]").expect("static query pattern"))
}

/// Canonical form of a search query, used for embedding and cache keys.
///
/// Composes to NFC (decomposed jamo from some input methods becomes
/// syllables), lowercases, drops punctuation other than brackets and
/// collapses whitespace. Stopwords are kept.
pub fn normalize_query(text: &str) -> String {
    let lowered = text.nfc().collect::<String>().to_lowercase();
    let stripped = disallowed().replace_all(&lowered, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
