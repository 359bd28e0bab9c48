//! `$like` pattern matching: `%` matches zero or more bytes, `_` matches
//! exactly one. Anchored to both ends of the text, applied byte-wise.

pub fn matches(pattern: &str, text: &str) -> bool {
    matches_bytes(pattern.as_bytes(), text.as_bytes())
}

fn matches_bytes(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'%'), _) => {
            matches_bytes(&pattern[1..], text)
                || (!text.is_empty() && matches_bytes(pattern, &text[1..]))
        }
        (Some(b'_'), Some(_)) => matches_bytes(&pattern[1..], &text[1..]),
        (Some(pc), Some(tc)) if pc == tc => matches_bytes(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::matches;

    #[test]
    fn percent_matches_zero_or_more() {
        assert!(matches("ali%", "alice"));
        assert!(matches("ali%", "ali"));
        assert!(!matches("ali%", "bob"));
    }

    #[test]
    fn underscore_matches_exactly_one() {
        assert!(matches("b_b", "bob"));
        assert!(!matches("b_b", "bb"));
        assert!(!matches("b_b", "boob"));
    }

    #[test]
    fn anchored_both_ends() {
        assert!(!matches("ali", "alice"));
        assert!(matches("%ice", "alice"));
        assert!(matches("%lic%", "alice"));
    }

    #[test]
    fn exact_match_with_no_wildcards() {
        assert!(matches("alice", "alice"));
        assert!(!matches("alice", "alicia"));
    }
}
