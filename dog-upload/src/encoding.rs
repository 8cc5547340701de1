use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};

/// Character set used to turn blob bytes into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// 7-bit ASCII; other bytes become `?`
    Ascii,
    /// ISO-8859-1, decoded as its windows-1252 superset
    Latin1,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    fn charset(&self) -> Option<&'static Encoding> {
        match self {
            Self::Utf8 => Some(UTF_8),
            Self::Ascii => None,
            Self::Latin1 => Some(WINDOWS_1252),
            Self::Utf16Le => Some(UTF_16LE),
            Self::Utf16Be => Some(UTF_16BE),
        }
    }

    /// Decode `bytes`. A byte order mark overrides the chosen charset and is
    /// stripped; malformed sequences become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self.charset() {
            Some(charset) => charset.decode(bytes).0.into_owned(),
            None => bytes
                .iter()
                .map(|b| if b.is_ascii() { *b as char } else { '?' })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_strips_bom() {
        assert_eq!(TextEncoding::Utf8.decode(b"\xEF\xBB\xBFline1\r\nline2"), "line1\r\nline2");
        assert_eq!(TextEncoding::Utf8.decode("päivää".as_bytes()), "päivää");
    }

    #[test]
    fn single_byte_charsets() {
        assert_eq!(TextEncoding::Latin1.decode(b"p\xE4iv\xE4\xE4"), "päivää");
        assert_eq!(TextEncoding::Ascii.decode(b"p\xE4iv"), "p?iv");
    }

    #[test]
    fn utf16_variants() {
        assert_eq!(TextEncoding::Utf16Le.decode(b"h\x00i\x00"), "hi");
        assert_eq!(TextEncoding::Utf16Be.decode(b"\x00h\x00i"), "hi");
        // BOM wins over the requested byte order
        assert_eq!(TextEncoding::Utf16Be.decode(b"\xFF\xFEh\x00i\x00"), "hi");
    }

    #[test]
    fn malformed_utf8_is_replaced() {
        assert_eq!(TextEncoding::Utf8.decode(b"a\xFFb"), "a\u{FFFD}b");
    }
}
