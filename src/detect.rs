//! Encoding detection from the first bytes of a stream.

use tracing::debug;

use super::charset::Charset;

/// Fewer peeked bytes than this are too short for byte-order-mark sniffing.
const MIN_SNIFF_LEN: usize = 3;

/// Outcome of [`detect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Detection {
    /// The encoding label to decode with.
    pub encoding: String,
    pub has_bom: bool,
    /// Length of the byte-order mark to skip before decoding.
    pub bom_len: usize,
}

impl Detection {
    fn plain(encoding: impl Into<String>) -> Self {
        Self {
            encoding: encoding.into(),
            has_bom: false,
            bom_len: 0,
        }
    }

    fn with_bom(charset: Charset, bom_len: usize) -> Self {
        Self {
            encoding: charset.name().to_owned(),
            has_bom: true,
            bom_len,
        }
    }
}

/// Picks the encoding to decode `peek` (the first bytes of a stream) with.
///
/// With a `configured` encoding, byte-order marks are only looked for when its name starts with
/// "UTF" (case-insensitively) or is "GB18030"; a mark found that way overrides the configured
/// name, and anything else returns the configured name untouched. Without a configured encoding,
/// a byte-order mark is looked for first, then the content is classified as UTF-8 by
/// [`Utf8Score`] or given the default encoding of `locale` from `locales`.
pub fn detect(
    peek: &[u8],
    configured: Option<&str>,
    locales: &LocaleTable,
    locale: Option<&str>,
) -> Detection {
    let detection = match configured.map(str::trim).filter(|c| !c.is_empty()) {
        Some(name) => match sniff(peek).filter(|_| is_unicode_family(name)) {
            Some((charset, len)) => Detection::with_bom(charset, len),
            None => Detection::plain(name),
        },
        None => match sniff(peek) {
            Some((charset, len)) => Detection::with_bom(charset, len),
            None if Utf8Score::scan(peek).is_utf8() => Detection::plain(Charset::Utf8.name()),
            None => Detection::plain(locales.lookup(locale)),
        },
    };
    debug!(
        encoding = %detection.encoding,
        has_bom = detection.has_bom,
        configured = ?configured,
        "detected encoding"
    );
    detection
}

fn sniff(peek: &[u8]) -> Option<(Charset, usize)> {
    if peek.len() < MIN_SNIFF_LEN {
        return None;
    }
    Charset::sniff_bom(peek)
}

/// Returns `true` for names whose files may start with a byte-order mark.
fn is_unicode_family(name: &str) -> bool {
    name.as_bytes()
        .get(..3)
        .is_some_and(|p| p.eq_ignore_ascii_case(b"UTF"))
        || name.eq_ignore_ascii_case("GB18030")
}

/// Tally of a statistical UTF-8 validity scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Utf8Score {
    /// Completed multibyte characters.
    pub valid: usize,
    /// Bytes that start or continue a multibyte sequence wrongly.
    pub errors: usize,
}

impl Utf8Score {
    /// Scans `buf`. A sequence cut off by the end of `buf` counts neither way.
    pub fn scan(buf: &[u8]) -> Self {
        let mut score = Self::default();
        let mut i = 0;
        while i < buf.len() {
            let lead = buf[i];
            let trail = match lead {
                0x00..=0x7f => {
                    i += 1;
                    continue;
                }
                0xc2..=0xdf => 1,
                0xe0..=0xef => 2,
                0xf0..=0xf4 => 3,
                _ => {
                    score.errors += 1;
                    i += 1;
                    continue;
                }
            };
            let tail = &buf[i + 1..buf.len().min(i + 1 + trail)];
            let continued = tail.iter().take_while(|&&b| b & 0xc0 == 0x80).count();
            if continued == trail {
                score.valid += 1;
                i += 1 + trail;
            } else if continued == tail.len() {
                // truncated by the end of the buffer
                break;
            } else {
                score.errors += 1;
                i += 1;
            }
        }
        score
    }

    /// Content is UTF-8 when it has no errors or when valid multibyte characters outnumber
    /// errors by more than two.
    pub fn is_utf8(self) -> bool {
        self.errors == 0 || self.valid > self.errors + 2
    }
}

/// Default 8-bit encodings by locale, consulted when nothing else identifies a file's encoding.
#[derive(Clone, Debug)]
pub struct LocaleTable {
    entries: Vec<(String, String)>,
    default: String,
}

impl LocaleTable {
    /// Creates an empty table that maps every locale to `default`.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            default: default.into(),
        }
    }

    /// Adds a mapping from a locale prefix such as `"ja"` or `"zh_TW"` to an encoding label.
    pub fn with_entry(mut self, locale: impl Into<String>, encoding: impl Into<String>) -> Self {
        self.entries.push((locale.into(), encoding.into()));
        self
    }

    /// Returns the encoding for `locale` (e.g. `"ru_RU.KOI8-R"`), matching the longest
    /// language/territory prefix and ignoring any codeset or modifier.
    pub fn lookup(&self, locale: Option<&str>) -> &str {
        let Some(locale) = locale else {
            return &self.default;
        };
        let name = locale
            .split(['.', '@'])
            .next()
            .unwrap_or_default();
        self.entries
            .iter()
            .filter(|(prefix, _)| {
                name == prefix
                    || name
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('_'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(&self.default, |(_, encoding)| encoding)
    }
}

impl Default for LocaleTable {
    fn default() -> Self {
        [
            ("ar", "ISO-8859-6"),
            ("bg", "windows-1251"),
            ("cs", "ISO-8859-2"),
            ("el", "ISO-8859-7"),
            ("he", "ISO-8859-8"),
            ("hr", "ISO-8859-2"),
            ("hu", "ISO-8859-2"),
            ("ja", "EUC-JP"),
            ("ko", "EUC-KR"),
            ("lt", "ISO-8859-13"),
            ("lv", "ISO-8859-13"),
            ("pl", "ISO-8859-2"),
            ("ro", "ISO-8859-2"),
            ("ru", "KOI8-R"),
            ("sk", "ISO-8859-2"),
            ("sl", "ISO-8859-2"),
            ("th", "TIS-620"),
            ("tr", "ISO-8859-9"),
            ("uk", "KOI8-U"),
            ("vi", "windows-1258"),
            ("zh", "GB18030"),
            ("zh_HK", "Big5-HKSCS"),
            ("zh_TW", "Big5"),
        ]
        .into_iter()
        .fold(LocaleTable::new("ISO-8859-1"), |table, (locale, encoding)| {
            table.with_entry(locale, encoding)
        })
    }
}
