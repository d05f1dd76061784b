/// Overlapping 2-character substrings of a token. Tokens shorter than two
/// characters are padded by repeating the final character so every token
/// yields at least one bigram.
pub fn bigrams(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    match chars.len() {
        0 => Vec::new(),
        1 => vec![format!("{0}{0}", chars[0])],
        _ => chars.windows(2).map(|w| w.iter().collect()).collect(),
    }
}

/// Space-joined decomposition as stored in the bigram table. Duplicates
/// are kept: a repeated bigram raises the row's match relevance.
pub fn bigram_text(token: &str) -> String {
    bigrams(token).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposes_overlapping_pairs() {
        assert_eq!(bigrams("hello"), vec!["he", "el", "ll", "lo"]);
    }

    #[test]
    fn single_char_token_is_padded() {
        assert_eq!(bigrams("a"), vec!["aa"]);
    }

    #[test]
    fn empty_token_has_no_bigrams() {
        assert!(bigrams("").is_empty());
    }

    #[test]
    fn keeps_duplicate_bigrams() {
        assert_eq!(bigram_text("aaa"), "aa aa");
    }

    #[test]
    fn handles_multibyte_characters() {
        assert_eq!(bigrams("héllo"), vec!["hé", "él", "ll", "lo"]);
    }
}
