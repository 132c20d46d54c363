//! Fixed English stop list

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// English stop words dropped when stop-word filtering is enabled
pub static ENGLISH: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "has", "have", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "can", "and", "or",
        "but", "not", "in", "on", "at", "to", "for", "of", "with", "by", "from", "as", "into",
        "it", "its", "this", "that", "which", "if", "so", "no", "up", "out", "all", "just",
        "also", "very",
    ]
    .into_iter()
    .collect()
});

pub fn is_stop_word(term: &str) -> bool {
    ENGLISH.contains(term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        assert!(is_stop_word("the"));
        assert!(is_stop_word("with"));
        assert!(!is_stop_word("engine"));
        assert!(!is_stop_word(""));
    }
}
