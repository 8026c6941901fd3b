use std::fmt;

use encoding_rs::Encoding;

use super::{Error, Result};

/// A character encoding as understood by the load and save paths.
///
/// The Unicode encodings (and GB18030, which covers all of Unicode) are distinguished because
/// they carry a byte-order mark; every other encoding known to `encoding_rs` is [`Other`].
///
/// [`Other`]: Charset::Other
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Utf16Be,
    Utf16Le,
    Utf32Be,
    Utf32Le,
    Gb18030,
    /// Recognised by its byte-order mark only; neither direction can convert it.
    UtfEbcdic,
    Other(&'static Encoding),
}

/// Byte-order marks, longest first so that a 4-byte mark is never mistaken for a 2-byte one
/// sharing its prefix (UTF-32LE `FF FE 00 00` versus UTF-16LE `FF FE`).
pub const BOM_TABLE: [(Charset, &[u8]); 7] = [
    (Charset::Utf32Be, &[0x00, 0x00, 0xfe, 0xff]),
    (Charset::Utf32Le, &[0xff, 0xfe, 0x00, 0x00]),
    (Charset::Gb18030, &[0x84, 0x31, 0x95, 0x33]),
    (Charset::UtfEbcdic, &[0xdd, 0x73, 0x66, 0x73]),
    (Charset::Utf8, &[0xef, 0xbb, 0xbf]),
    (Charset::Utf16Be, &[0xfe, 0xff]),
    (Charset::Utf16Le, &[0xff, 0xfe]),
];

impl Charset {
    /// Resolves an encoding label such as `"utf-8"`, `"ISO-8859-1"` or `"UTF-32LE"`.
    ///
    /// Labels are resolved as `encoding_rs` does (WHATWG labels, case-insensitive, surrounding
    /// whitespace ignored), with UTF-32 and UTF-EBCDIC labels added. A bare `"UTF-32"` means
    /// big-endian.
    pub fn from_label(label: &str) -> Result<Self> {
        let label = label.trim();
        let charset = match label.to_ascii_uppercase().as_str() {
            "UTF-32" | "UTF32" | "UTF-32BE" | "UTF32BE" | "UCS-4" | "UCS-4BE" => Charset::Utf32Be,
            "UTF-32LE" | "UTF32LE" | "UCS-4LE" => Charset::Utf32Le,
            "UTF-EBCDIC" => Charset::UtfEbcdic,
            _ => match Encoding::for_label(label.as_bytes()) {
                Some(e) if e == encoding_rs::REPLACEMENT => {
                    return Err(Error::UnsupportedEncoding(label.to_owned()))
                }
                Some(e) => Charset::from_encoding(e),
                None => return Err(Error::UnsupportedEncoding(label.to_owned())),
            },
        };
        Ok(charset)
    }

    /// Wraps an `encoding_rs` encoding.
    pub fn from_encoding(encoding: &'static Encoding) -> Self {
        if encoding == encoding_rs::UTF_8 {
            Charset::Utf8
        } else if encoding == encoding_rs::UTF_16BE {
            Charset::Utf16Be
        } else if encoding == encoding_rs::UTF_16LE {
            Charset::Utf16Le
        } else if encoding == encoding_rs::GB18030 {
            Charset::Gb18030
        } else {
            Charset::Other(encoding)
        }
    }

    /// Returns the canonical name of the encoding.
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Utf16Be => "UTF-16BE",
            Charset::Utf16Le => "UTF-16LE",
            Charset::Utf32Be => "UTF-32BE",
            Charset::Utf32Le => "UTF-32LE",
            Charset::Gb18030 => "gb18030",
            Charset::UtfEbcdic => "UTF-EBCDIC",
            Charset::Other(e) => e.name(),
        }
    }

    /// Returns the byte-order mark of the encoding, or an empty slice if it has none.
    pub fn bom(self) -> &'static [u8] {
        BOM_TABLE
            .iter()
            .find(|(c, _)| *c == self)
            .map(|(_, bom)| *bom)
            .unwrap_or(&[])
    }

    /// Returns the `encoding_rs` counterpart, if there is one.
    pub fn encoding(self) -> Option<&'static Encoding> {
        match self {
            Charset::Utf8 => Some(encoding_rs::UTF_8),
            Charset::Utf16Be => Some(encoding_rs::UTF_16BE),
            Charset::Utf16Le => Some(encoding_rs::UTF_16LE),
            Charset::Gb18030 => Some(encoding_rs::GB18030),
            Charset::Other(e) => Some(e),
            Charset::Utf32Be | Charset::Utf32Le | Charset::UtfEbcdic => None,
        }
    }

    /// Finds the encoding whose byte-order mark starts `bytes`, longest mark first.
    pub fn sniff_bom(bytes: &[u8]) -> Option<(Self, usize)> {
        BOM_TABLE
            .iter()
            .find(|(_, bom)| bytes.starts_with(bom))
            .map(|(c, bom)| (*c, bom.len()))
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
