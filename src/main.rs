//! Differential cross-checks of the conversion pipeline against the
//! `regex` crate.
//!
//! The library's grammar writes alternation as `+` and the empty word
//! as `_`; both translate mechanically into the `regex` crate's syntax
//! (`|` and an empty group). Each check enumerates every short word
//! over the alphabet and compares full-word acceptance, or walks every
//! prefix of an input and compares the longest accepted one, so a
//! disagreement pinpoints the exact word that one engine got wrong.

fn main() {}

#[cfg(test)]
mod cross_checks {
    use regex_roundtrip::{
        max_match, mdfa_from_regex, regex_from_dfa, Regex, SimpleAlphabet,
    };

    type Ab = SimpleAlphabet<2>;

    /// Translate a pattern of the library grammar into the `regex`
    /// crate's syntax. Only unescaped patterns are supported, which is
    /// all the fixtures below use.
    fn to_std_syntax(pattern: &str) -> String {
        let mut out = String::new();
        for chr in pattern.chars() {
            match chr {
                '+' => out.push('|'),
                '_' => out.push_str("()"),
                other => out.push(other),
            }
        }
        out
    }

    fn oracle(pattern: &str) -> regex::Regex {
        let anchored = format!("^(?:{})$", to_std_syntax(pattern));
        regex::Regex::new(&anchored).expect("translated pattern should be valid")
    }

    /// Every word over {a, b} of length at most `max_len`.
    fn words(max_len: usize) -> Vec<String> {
        let mut all = vec![String::new()];
        let mut frontier = vec![String::new()];
        for _ in 0..max_len {
            let mut next = Vec::new();
            for word in &frontier {
                for chr in ['a', 'b'] {
                    let mut longer = word.clone();
                    longer.push(chr);
                    next.push(longer);
                }
            }
            all.extend(next.iter().cloned());
            frontier = next;
        }
        all
    }

    /// The minimal DFA accepts exactly the words the `regex` crate
    /// accepts.
    fn assert_same_language(pattern: &str, max_len: usize) {
        let re = oracle(pattern);
        let regex: Regex<Ab> = pattern.parse().expect("pattern should parse");
        let dfa = mdfa_from_regex(&regex);
        for word in words(max_len) {
            assert_eq!(
                dfa.accepts(word.chars()),
                re.is_match(&word),
                "pattern {pattern:?} disagrees with the regex crate on {word:?}"
            );
        }
    }

    /// The regex reconstructed from the minimal DFA still matches the
    /// oracle.
    fn assert_reconstruction_same_language(pattern: &str, max_len: usize) {
        let re = oracle(pattern);
        let regex: Regex<Ab> = pattern.parse().expect("pattern should parse");
        let back = regex_from_dfa(&mdfa_from_regex(&regex))
            .expect("test languages are not empty");
        let dfa = mdfa_from_regex(&back);
        for word in words(max_len) {
            assert_eq!(
                dfa.accepts(word.chars()),
                re.is_match(&word),
                "reconstruction of {pattern:?} (printed {back}) disagrees on {word:?}"
            );
        }
    }

    /// `max_match` agrees with the longest prefix the `regex` crate
    /// accepts.
    fn assert_same_longest_prefix(pattern: &str, input: &str) {
        let re = oracle(pattern);
        let expected = (0..=input.len())
            .rev()
            .find(|&end| re.is_match(&input[..end]))
            .unwrap_or(0);
        assert_eq!(
            max_match::<Ab>(pattern, input),
            Ok(expected),
            "pattern {pattern:?} on input {input:?}"
        );
    }

    #[test]
    fn test_language_vs_regex_crate() {
        assert_same_language("(ab+ba)*(_+a+ba)", 8);
        assert_same_language("a(a+b)*b", 8);
        assert_same_language("((a+b)(a+b))*", 8);
        assert_same_language("a?b*a", 8);
        assert_same_language("_+a+b?", 8);
        assert_same_language("(a?b)*a?", 7);
        assert_same_language("(a+b)(a+b)?(a+b)?", 7);
    }

    #[test]
    fn test_reconstruction_vs_regex_crate() {
        assert_reconstruction_same_language("(ab+ba)*(_+a+ba)", 8);
        assert_reconstruction_same_language("a(a+b)*b", 8);
        assert_reconstruction_same_language("((a+b)(a+b))*", 8);
        assert_reconstruction_same_language("a?b*a", 8);
        assert_reconstruction_same_language("(a?b)*a?", 7);
    }

    #[test]
    fn test_longest_prefix_vs_regex_crate() {
        assert_same_longest_prefix("(ab+ba)*", "abbaabab");
        assert_same_longest_prefix("(ab+ba)*", "aabba");
        assert_same_longest_prefix("a(a+b)*b", "abbbba");
        assert_same_longest_prefix("a?b*a", "bbbab");
        assert_same_longest_prefix("_+a+ba", "baa");
        assert_same_longest_prefix("(a+b)(a+b)", "b");
    }
}
