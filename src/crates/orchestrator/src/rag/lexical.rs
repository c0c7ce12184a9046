//! Cheap lexical checks run around retrieval.

use regex::Regex;
use std::sync::LazyLock;

/// Names that only show up in programming questions
const CODE_TOKENS: &[&str] = &[
    "javascript", "typescript", "golang", "kotlin", "php", "c++", "c#", "sql", "bash", "regex", "html",
    "css", "json", "yaml", "compiler", "traceback", "stacktrace", "segfault", "npm", "kubernetes",
];

/// Names that are also ordinary words; they count only next to a
/// programming cue or another such name
const AMBIGUOUS_CODE_TOKENS: &[&str] = &[
    "python", "rust", "java", "swift", "ruby", "go", "function", "compile", "cargo", "pip", "docker",
];

const PROGRAMMING_CUES: &[&str] = &[
    "code", "program", "programming", "script", "snippet", "syntax", "library", "crate", "package",
    "debug", "variable", "loop", "array", "vec", "struct", "class", "method", "compile", "runtime",
];

const CODE_PUNCTUATION: &[&str] = &[
    "def ", "print(", "=>", ":=", "();", "```", "#include", "console.log", "!=", "==", "&&", "||", "->",
];

/// Keywords that read as English unless followed by code syntax
static CODE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\breturn\s*[;(]|\breturn\s+[\w.]+\s*;|\bimport\s+\w+(\.\w+)+|\bfrom\s+[\w.]+\s+import\s+\w+|\bfn\s+\w+\s*[(<]")
        .unwrap()
});

const STOP_WORDS: &[&str] = &[
    // English
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "of", "in", "on", "at", "to", "for",
    "from", "by", "with", "and", "or", "not", "what", "which", "who", "whom", "when", "where", "why",
    "how", "does", "do", "did", "this", "that", "these", "those", "it", "its", "my", "your", "our",
    "their", "me", "you", "we", "they", "i", "about", "can", "could", "should", "would", "will",
    "please", "tell", "say", "says", "there", "here", "any", "some", "all", "document", "file", "page",
    // Turkish
    "bir", "ve", "ile", "bu", "şu", "o", "ne", "nedir", "mi", "mı", "mu", "mü", "için", "gibi", "da",
    "de", "ki", "hangi", "nasıl", "neden", "var", "yok", "bana", "belge", "dosya", "sayfa",
];

/// Programming-language tokens or code-like syntax
pub fn is_code_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    if CODE_PUNCTUATION.iter().any(|p| lower.contains(p)) || CODE_KEYWORD.is_match(&lower) {
        return true;
    }

    let tokens: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '?' | '!' | ':' | ';' | '(' | ')'))
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.iter().any(|t| CODE_TOKENS.contains(t)) {
        return true;
    }
    let ambiguous = tokens.iter().filter(|t| AMBIGUOUS_CODE_TOKENS.contains(*t)).count();
    let cued = tokens.iter().any(|t| PROGRAMMING_CUES.contains(t));
    ambiguous >= 2 || (ambiguous == 1 && cued)
}

/// Lower-cased query tokens with stop-words removed
pub fn content_tokens(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// At least one content token of the query appears in `text`
///
/// A query made only of stop-words fails.
pub fn lexical_sanity(query: &str, text: &str) -> bool {
    let haystack = text.to_lowercase();
    content_tokens(query).iter().any(|t| haystack.contains(t.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_queries() {
        assert!(is_code_query("def foo(x): return x"));
        assert!(is_code_query("why does print(x) fail"));
        assert!(is_code_query("How do I sort a vec in Rust?"));
        assert!(is_code_query("x := 5"));
        assert!(!is_code_query("What does the contract say about termination?"));
    }

    #[test]
    fn test_keywords_need_code_syntax() {
        assert!(is_code_query("why does return; exit early here"));
        assert!(is_code_query("import numpy.linalg fails"));
        assert!(is_code_query("from os import path"));
        assert!(is_code_query("fn main() panics"));
        assert!(is_code_query("python script keeps crashing"));
    }

    #[test]
    fn test_prose_questions_are_not_code() {
        assert!(!is_code_query("What does the contract say about the return policy?"));
        assert!(!is_code_query("Which import duties apply per the invoice?"));
        assert!(!is_code_query("Summarize the rust treatment section of the manual"));
        assert!(!is_code_query("Is cargo insurance covered by clause 7?"));
        assert!(!is_code_query("What is the function of the audit committee?"));
    }

    #[test]
    fn test_content_tokens_drop_stop_words() {
        assert_eq!(
            content_tokens("What is the termination notice period?"),
            vec!["termination", "notice", "period"]
        );
    }

    #[test]
    fn test_lexical_sanity() {
        let text = "Either party may terminate with a Termination Notice of 30 days.";
        assert!(lexical_sanity("termination notice period", text));
        assert!(!lexical_sanity("refund policy", text));
        assert!(!lexical_sanity("what is the", text));
    }
}
