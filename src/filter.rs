//! Payload transforms applied to the target -> client direction of a relay.

use std::borrow::Cow;
use std::sync::Arc;

use crate::config::FilterMode;

/// Hook applied to every chunk relayed from the target back to the client.
///
/// May return the input untouched or bytes of a different length.
pub trait Transform: Send + Sync {
    fn transform<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Forwards bytes unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn transform<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(chunk)
    }
}

/// Swaps gendered English pronouns in plain text.
///
/// Works per chunk, so a pronoun split across two reads is left as is.
/// Chunks that are not valid UTF-8 pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PronounSwap;

const PRONOUN_PAIRS: &[(&str, &str)] = &[("he", "she"), ("him", "her"), ("his", "her")];

/// Word endings a pronoun is recognised in front of.
const WORD_ENDINGS: &[&str] = &[" ", ", ", ".", "!", "?"];

/// Temporary token for the three-step swap; must not occur in real text.
const PLACEHOLDER: &str = "6m7Q6q16";

impl Transform for PronounSwap {
    fn transform<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        match std::str::from_utf8(chunk) {
            Ok(text) => {
                let swapped = swap_pronouns(text);
                if swapped == text {
                    Cow::Borrowed(chunk)
                } else {
                    Cow::Owned(swapped.into_bytes())
                }
            }
            Err(_) => Cow::Borrowed(chunk),
        }
    }
}

/// Build the transform selected by configuration.
pub fn from_mode(mode: FilterMode) -> Arc<dyn Transform> {
    match mode {
        FilterMode::Off => Arc::new(Identity),
        FilterMode::Simple => Arc::new(PronounSwap),
    }
}

pub fn swap_pronouns(text: &str) -> String {
    // leading space so a pronoun at the very start is matched too
    let mut out = format!(" {}", text);

    for (first, second) in PRONOUN_PAIRS {
        let cases = [
            (first.to_string(), second.to_string()),
            (first.to_uppercase(), second.to_uppercase()),
            (title_case(first), title_case(second)),
        ];
        for (a, b) in &cases {
            for ending in WORD_ENDINGS {
                out = swap_pair(&out, &format!(" {}{}", a, ending), &format!(" {}{}", b, ending));
            }
        }
    }

    out.split_off(1)
}

fn swap_pair(text: &str, a: &str, b: &str) -> String {
    text.replace(a, PLACEHOLDER)
        .replace(b, a)
        .replace(PLACEHOLDER, b)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_borrowed() {
        let input = b"He said hello";
        assert!(matches!(Identity.transform(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_simple_sentence() {
        assert_eq!(swap_pronouns("She is a nice girl."), "He is a nice girl.");
        assert_eq!(swap_pronouns("He is a nice guy."), "She is a nice guy.");
    }

    #[test]
    fn test_mixed_case_and_positions() {
        let input =
            "He, and SHE likes me so much. HELP him! His dog likes tea and eats with him cake. That's hers.";
        let expected =
            "She, and HE likes me so much. HELP his! Her dog likes tea and eats with his cake. That's hers.";
        assert_eq!(swap_pronouns(input), expected);
    }

    #[test]
    fn test_words_containing_pronouns_untouched() {
        assert_eq!(swap_pronouns("Sheer theme, help."), "Sheer theme, help.");
    }

    #[test]
    fn test_non_utf8_passes_through() {
        let input = [0xFF, 0xFE, b' ', b'h', b'e', b' '];
        assert_eq!(PronounSwap.transform(&input).as_ref(), &input);
    }

    #[test]
    fn test_changed_length() {
        // him <-> her runs before his <-> her, so a lone "her" ends up as "him"
        let out = PronounSwap.transform(b"ask her.");
        assert_eq!(out.as_ref(), b"ask him.");
        let out = PronounSwap.transform(b"he ran");
        assert_eq!(out.as_ref(), b"she ran");
    }

    #[test]
    fn test_from_mode() {
        let off = from_mode(FilterMode::Off);
        assert_eq!(off.transform(b"he ran").as_ref(), b"he ran");
        let simple = from_mode(FilterMode::Simple);
        assert_eq!(simple.transform(b"he ran").as_ref(), b"she ran");
    }
}
