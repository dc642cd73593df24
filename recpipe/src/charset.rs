use std::collections::HashMap;

use thiserror::Error;

/// Label appended to every encoded caption to mark end-of-sequence. Also
/// used as the padding value in dense label batches.
pub const EOS_LABEL: i32 = -1;

/// Errors that can occur when building a [Charset] or encoding captions.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum CharsetError {
    /// A caption contained a character with no entry in the charset.
    #[error("character {0:?} is not in the output charset")]
    UnknownChar(char),
    /// The charset listed the same character twice, which would make the
    /// label mapping ambiguous.
    #[error("charset contains duplicate character {0:?}")]
    DuplicateChar(char),
}

/// The fixed, ordered alphabet of output symbols.
///
/// A character's position in the construction string is its training label.
/// The same charset must be used when decoding model outputs during
/// inference, otherwise labels silently map to the wrong characters.
#[derive(Clone, Debug)]
pub struct Charset {
    chars: Vec<char>,
    index: HashMap<char, i32>,
}

impl Charset {
    pub fn new(symbols: &str) -> Result<Charset, CharsetError> {
        let chars: Vec<char> = symbols.chars().collect();
        let mut index = HashMap::with_capacity(chars.len());
        for (i, &ch) in chars.iter().enumerate() {
            if index.insert(ch, i as i32).is_some() {
                return Err(CharsetError::DuplicateChar(ch));
            }
        }
        Ok(Charset { chars, index })
    }

    /// Number of symbols in the charset.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Return the label for `ch`, if it is a charset member.
    pub fn label_for_char(&self, ch: char) -> Option<i32> {
        self.index.get(&ch).copied()
    }

    /// Return the character a label maps to. [EOS_LABEL] and out-of-range
    /// labels map to `None`.
    pub fn char_for_label(&self, label: i32) -> Option<char> {
        usize::try_from(label)
            .ok()
            .and_then(|i| self.chars.get(i))
            .copied()
    }

    /// Encode a caption as a label sequence ending in [EOS_LABEL].
    ///
    /// Fails on the first character that is not a charset member. This is
    /// fatal for the example: it means the generator and the charset
    /// disagree about the output alphabet.
    pub fn encode(&self, caption: &str) -> Result<Vec<i32>, CharsetError> {
        let mut labels = Vec::with_capacity(caption.len() + 1);
        for ch in caption.chars() {
            match self.label_for_char(ch) {
                Some(label) => labels.push(label),
                None => return Err(CharsetError::UnknownChar(ch)),
            }
        }
        labels.push(EOS_LABEL);
        Ok(labels)
    }

    /// Render a label sequence back to text, stopping at [EOS_LABEL].
    ///
    /// Labels outside the charset render as `?`.
    pub fn decode(&self, labels: &[i32]) -> String {
        labels
            .iter()
            .take_while(|&&label| label != EOS_LABEL)
            .map(|&label| self.char_for_label(label).unwrap_or('?'))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Charset, CharsetError, EOS_LABEL};

    #[test]
    fn test_encode_appends_eos() {
        let charset = Charset::new("abc0").unwrap();

        let labels = charset.encode("c0ab").unwrap();

        assert_eq!(labels.len(), "c0ab".len() + 1);
        assert_eq!(labels, [2, 3, 0, 1, EOS_LABEL]);
    }

    #[test]
    fn test_encode_empty_caption() {
        let charset = Charset::new("abc").unwrap();
        assert_eq!(charset.encode("").unwrap(), [EOS_LABEL]);
    }

    #[test]
    fn test_encode_unknown_char() {
        let charset = Charset::new("abc").unwrap();
        assert_eq!(
            charset.encode("ab!").err(),
            Some(CharsetError::UnknownChar('!'))
        );
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        assert_eq!(
            Charset::new("abca").err(),
            Some(CharsetError::DuplicateChar('a'))
        );
    }

    #[test]
    fn test_decode_inverts_encode() {
        let charset = Charset::new("abcdef ").unwrap();
        let labels = charset.encode("fed cab").unwrap();
        assert_eq!(charset.decode(&labels), "fed cab");
    }

    #[test]
    fn test_decode_unknown_label() {
        let charset = Charset::new("ab").unwrap();
        // Stops at EOS; labels past the charset render as `?`.
        assert_eq!(charset.decode(&[0, 7, 1, EOS_LABEL, 0]), "a?b");
    }
}
