use std::borrow::Cow;

use encoding_rs::UTF_8;

/// 預設的二進位偵測取樣長度。 / Default number of leading bytes sampled for binary detection.
pub const DEFAULT_SAMPLE_LEN: usize = 100;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 分類後的檔案內容。 / Decoded file payload along with its binary flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classified {
    pub content: String,
    pub is_binary: bool,
}

impl Classified {
    fn empty() -> Self {
        Self::default()
    }

    fn binary() -> Self {
        Self {
            content: String::new(),
            is_binary: true,
        }
    }
}

/// 判斷位元組為文字或二進位，並安全地解碼文字。 / Decides binary vs. text and decodes text without ever failing.
#[derive(Debug, Clone, Copy)]
pub struct ContentClassifier {
    sample_len: usize,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_LEN)
    }
}

impl ContentClassifier {
    /// 以指定的取樣長度建立分類器。 / Creates a classifier sampling at most `sample_len` leading bytes.
    pub fn new(sample_len: usize) -> Self {
        Self {
            sample_len: sample_len.max(1),
        }
    }

    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    /// 分類原始位元組。 / Classifies a raw payload; absent or empty input yields empty text.
    pub fn classify(&self, bytes: Option<&[u8]>) -> Classified {
        let Some(bytes) = bytes else {
            return Classified::empty();
        };
        if bytes.is_empty() {
            return Classified::empty();
        }

        if self.looks_binary(bytes) {
            return Classified::binary();
        }

        match decode_utf8_strict(bytes) {
            Some(content) => Classified {
                content,
                is_binary: false,
            },
            None => {
                tracing::warn!(len = bytes.len(), "payload is not valid UTF-8; mirroring as empty text");
                Classified::empty()
            }
        }
    }

    /// 只檢查前綴樣本，成本與檔案大小無關。 / Inspects only a bounded prefix, so cost does not grow with file size.
    pub fn looks_binary(&self, bytes: &[u8]) -> bool {
        let payload = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let truncated = payload.len() > self.sample_len;
        let sample = &payload[..payload.len().min(self.sample_len)];

        if sample.iter().any(|byte| *byte <= 0x08) {
            return true;
        }

        match std::str::from_utf8(sample) {
            Ok(_) => false,
            // 取樣邊界可能切斷多位元組字元。 / The sample boundary may split a multi-byte character.
            Err(err) => !(truncated && err.error_len().is_none()),
        }
    }
}

fn decode_utf8_strict(bytes: &[u8]) -> Option<String> {
    let payload = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    UTF_8
        .decode_without_bom_handling_and_without_replacement(payload)
        .map(Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_empty_payload_is_empty_text() {
        let classifier = ContentClassifier::default();
        assert_eq!(classifier.classify(None), Classified::default());
        assert_eq!(classifier.classify(Some(&[])), Classified::default());
    }

    #[test]
    fn decodes_plain_utf8() {
        let classifier = ContentClassifier::default();
        let result = classifier.classify(Some("héllo\nwörld".as_bytes()));
        assert_eq!(result.content, "héllo\nwörld");
        assert!(!result.is_binary);
    }

    #[test]
    fn strips_utf8_bom() {
        let classifier = ContentClassifier::default();
        let result = classifier.classify(Some(b"\xEF\xBB\xBFhello"));
        assert_eq!(result.content, "hello");
    }

    #[test]
    fn nul_bytes_mark_payload_binary() {
        let classifier = ContentClassifier::default();
        let result = classifier.classify(Some(b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR"));
        assert!(result.is_binary);
        assert!(result.content.is_empty());
    }

    #[test]
    fn multibyte_char_split_at_sample_boundary_is_text() {
        let classifier = ContentClassifier::new(4);
        // "aaa" + "é" (2 bytes): the sample ends in the middle of "é".
        let result = classifier.classify(Some("aaaé and more".as_bytes()));
        assert!(!result.is_binary);
        assert_eq!(result.content, "aaaé and more");
    }

    #[test]
    fn invalid_utf8_after_sample_degrades_to_empty_text() {
        let classifier = ContentClassifier::new(4);
        let mut bytes = b"text".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE, 0xFD]);
        let result = classifier.classify(Some(&bytes));
        assert_eq!(result, Classified::default());
    }

    #[test]
    fn invalid_utf8_inside_sample_is_binary() {
        let classifier = ContentClassifier::default();
        let result = classifier.classify(Some(&[b'a', 0xFF, b'b']));
        assert!(result.is_binary);
    }

    #[test]
    fn sample_len_is_at_least_one() {
        assert_eq!(ContentClassifier::new(0).sample_len(), 1);
    }
}
