//! Ingredient name canonicalization.
//!
//! Everything downstream (scoring, synonym lookup, exact matching) operates
//! on the normalized form, never on raw catalog text. Two names with the
//! same token multiset are the same ingredient regardless of word order:
//! "Oreo Crushed" and "Crushed Oreo" both normalize to `["crushed", "oreo"]`.

use crate::synonyms::{expand_abbreviation, is_descriptor};

/// Canonical form of an ingredient or inventory item name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Lowercased, punctuation-free, descriptor-stripped tokens in sorted
    /// order. Never empty for a non-empty input.
    pub tokens: Vec<String>,
    /// `tokens` joined by single spaces; the key used for synonym lookup.
    pub joined: String,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Lowercase, trim, map punctuation to spaces, expand abbreviations, strip
/// descriptor tokens, sort. Descriptor stripping backs off when it would
/// erase the whole name ("Fresh" alone stays "fresh").
pub fn normalize(name: &str) -> Normalized {
    let mut cleaned = String::with_capacity(name.len() + 8);
    for c in name.trim().chars() {
        if c == '&' {
            cleaned.push_str(" and ");
        } else if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                cleaned.push(lc);
            }
        } else {
            cleaned.push(' ');
        }
    }

    let all_tokens: Vec<String> = cleaned
        .split_whitespace()
        .map(|t| expand_abbreviation(t).to_string())
        .collect();

    let mut tokens: Vec<String> = all_tokens
        .iter()
        .filter(|t| !is_descriptor(t))
        .cloned()
        .collect();
    if tokens.is_empty() {
        tokens = all_tokens;
    }

    tokens.sort_unstable();
    let joined = tokens.join(" ");
    Normalized { tokens, joined }
}

/// Trailing-s plural trim used for token pair comparison only. The canonical
/// form keeps plurals so "Cups" still displays distinctly from "Cup".
pub fn trim_plural(token: &str) -> &str {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(name: &str) -> String {
        normalize(name).joined
    }

    // --- canonical form ---

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(joined("  Oreo   COOKIES "), "cookies oreo");
    }

    #[test]
    fn word_order_does_not_matter() {
        assert_eq!(joined("Oreo Crushed"), joined("Crushed Oreo"));
    }

    #[test]
    fn punctuation_becomes_spaces() {
        assert_eq!(joined("Mango-Jam (Jar)"), "jam jar mango");
    }

    #[test]
    fn ampersand_expands_to_and() {
        assert_eq!(joined("Cream & Sugar"), "and cream sugar");
    }

    #[test]
    fn abbreviations_expand_tokenwise() {
        assert_eq!(joined("2 pcs tray"), "2 pieces tray");
    }

    #[test]
    fn descriptors_are_stripped() {
        assert_eq!(joined("Fresh Milk"), "milk");
        assert_eq!(joined("Organic Premium Sugar"), "sugar");
    }

    #[test]
    fn all_descriptor_name_keeps_its_tokens() {
        assert_eq!(joined("Fresh"), "fresh");
        assert_eq!(joined("Large Regular"), "large regular");
    }

    #[test]
    fn empty_input_yields_empty_form() {
        assert!(normalize("").is_empty());
        assert!(normalize("  \t ").is_empty());
    }

    // --- plural trim ---

    #[test]
    fn plural_trim_strips_single_trailing_s() {
        assert_eq!(trim_plural("cups"), "cup");
        assert_eq!(trim_plural("straws"), "straw");
    }

    #[test]
    fn plural_trim_leaves_short_and_double_s_words() {
        assert_eq!(trim_plural("gas"), "gas");
        assert_eq!(trim_plural("glass"), "glass");
        assert_eq!(trim_plural("ms"), "ms");
    }
}
