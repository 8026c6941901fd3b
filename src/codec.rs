//! Converters driven by the load and save loops.
//!
//! Every converter implements [`Transcode`], a single streaming step from one byte slice to
//! another. The load direction turns source bytes into UTF-8 and the save direction turns UTF-8
//! into destination bytes; [`decoder_for`] and [`encoder_for`] pick the implementation once per
//! operation.

use std::collections::HashMap;

use encoding_rs::{DecoderResult, Encoding, EncoderResult};

use super::{
    charset::Charset,
    util::{self, DebuggableDecoder, DebuggableEncoder, Utf8Prefix},
    Error, Result,
};

/// Why a [`Transcode::transcode`] call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// All consumable input was consumed. The caller calls again if input remains.
    InputEmpty,
    /// The output slice is too short for the next unit; retry after making room.
    OutputFull,
    /// An input unit that cannot be converted was consumed without producing output. `byte` is
    /// its first byte.
    Invalid { byte: u8 },
    /// The input ends with a partial unit that was not consumed. Never returned for the last
    /// input.
    Incomplete,
}

/// The result of a [`Transcode::transcode`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub step: Step,
    /// Input bytes consumed, including an invalid unit.
    pub consumed: usize,
    /// Output bytes written.
    pub written: usize,
    /// Characters converted whose conversion does not survive a round trip.
    pub non_reversible: usize,
}

impl Outcome {
    fn new(step: Step, consumed: usize, written: usize) -> Self {
        Self {
            step,
            consumed,
            written,
            non_reversible: 0,
        }
    }
}

/// A streaming conversion step.
pub trait Transcode {
    /// Converts as much of `src` into `dst` as possible. `last` tells the converter that no
    /// input follows `src`, letting it flush pending state and report a trailing partial unit
    /// as invalid.
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome;
}

impl<T: Transcode + ?Sized> Transcode for Box<T> {
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome {
        (**self).transcode(src, dst, last)
    }
}

/// Returns the converter that decodes `charset` into UTF-8.
pub fn decoder_for(charset: Charset) -> Result<Box<dyn Transcode>> {
    let unsupported = || Error::UnsupportedEncoding(charset.name().to_owned());
    let converter: Box<dyn Transcode> = match charset {
        Charset::Utf8 => Box::new(IdentityCopy),
        Charset::Utf32Be => Box::new(Utf32Decoder(Endian::Big)),
        Charset::Utf32Le => Box::new(Utf32Decoder(Endian::Little)),
        Charset::Utf16Be | Charset::Utf16Le | Charset::Gb18030 | Charset::Other(_) => {
            Box::new(CharsetDecoder::new(charset.encoding().ok_or_else(unsupported)?))
        }
        Charset::UtfEbcdic => return Err(unsupported()),
    };
    Ok(converter)
}

/// Returns the converter that encodes UTF-8 into `charset`.
pub fn encoder_for(charset: Charset) -> Result<Box<dyn Transcode>> {
    let unsupported = || Error::UnsupportedEncoding(charset.name().to_owned());
    let converter: Box<dyn Transcode> = match charset {
        Charset::Utf8 => Box::new(IdentityCopy),
        Charset::Utf16Be => Box::new(Utf16Encoder(Endian::Big)),
        Charset::Utf16Le => Box::new(Utf16Encoder(Endian::Little)),
        Charset::Utf32Be => Box::new(Utf32Encoder(Endian::Big)),
        Charset::Utf32Le => Box::new(Utf32Encoder(Endian::Little)),
        Charset::Gb18030 | Charset::Other(_) => {
            // encoders of some encodings (e.g. "replacement") write another encoding
            let encoding = charset
                .encoding()
                .filter(|e| e.output_encoding() == *e)
                .ok_or_else(unsupported)?;
            Box::new(CharsetEncoder::new(encoding))
        }
        Charset::UtfEbcdic => return Err(unsupported()),
    };
    Ok(converter)
}

/// Splits off the valid UTF-8 head of `src`, or returns the outcome for what blocks it.
fn valid_head(src: &[u8], last: bool) -> std::result::Result<&str, Outcome> {
    match util::utf8_prefix(src) {
        Utf8Prefix::Valid(s) => Ok(s),
        Utf8Prefix::Invalid(len) => Err(Outcome::new(Step::Invalid { byte: src[0] }, len, 0)),
        Utf8Prefix::Incomplete if last => Err(Outcome::new(
            Step::Invalid { byte: src[0] },
            src.len(),
            0,
        )),
        Utf8Prefix::Incomplete => Err(Outcome::new(Step::Incomplete, 0, 0)),
    }
}

/// Copies UTF-8 to UTF-8, validating it on the way.
///
/// Serves both directions when the file is UTF-8. Malformed input is reported as
/// [`Step::Invalid`] one maximal subpart at a time: a lead byte together with the continuation
/// bytes that follow it before the sequence breaks, or else a single byte. So `E6 97 78` is one
/// invalid unit of two bytes followed by `x`, the same unit the `encoding_rs` decoders report.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityCopy;

impl Transcode for IdentityCopy {
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome {
        let s = match valid_head(src, last) {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        let mut n = s.len().min(dst.len());
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        dst[..n].copy_from_slice(&s.as_bytes()[..n]);
        let step = if n < s.len() {
            Step::OutputFull
        } else {
            Step::InputEmpty
        };
        Outcome::new(step, n, n)
    }
}

/// Decodes any `encoding_rs` encoding into UTF-8.
///
/// The decoder is created without byte-order-mark handling; marks are detected and skipped
/// before decoding starts.
#[derive(Debug)]
pub struct CharsetDecoder {
    decoder: DebuggableDecoder,
    /// The last bytes consumed by previous calls, to name the first byte of a malformed
    /// sequence that began in an earlier input slice.
    history: Vec<u8>,
}

impl CharsetDecoder {
    const HISTORY: usize = 8;

    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder_without_bom_handling().into(),
            history: Vec::with_capacity(Self::HISTORY * 2),
        }
    }

    /// Returns the byte `back` positions before `src[consumed]`, reaching into earlier input.
    fn byte_before(&self, src: &[u8], consumed: usize, back: usize) -> u8 {
        if back <= consumed {
            src[consumed - back]
        } else {
            let from_end = back - consumed;
            self.history
                .len()
                .checked_sub(from_end)
                .and_then(|i| self.history.get(i))
                .or_else(|| src.first())
                .copied()
                .unwrap_or_default()
        }
    }

    fn remember(&mut self, consumed: &[u8]) {
        let keep = consumed.len().min(Self::HISTORY);
        self.history.extend_from_slice(&consumed[consumed.len() - keep..]);
        if self.history.len() > Self::HISTORY {
            self.history.drain(..self.history.len() - Self::HISTORY);
        }
    }
}

impl Transcode for CharsetDecoder {
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome {
        let (result, consumed, written) = self
            .decoder
            .decode_to_utf8_without_replacement(src, dst, last);
        let step = match result {
            DecoderResult::InputEmpty => Step::InputEmpty,
            DecoderResult::OutputFull => Step::OutputFull,
            DecoderResult::Malformed(bad, extra) => Step::Invalid {
                byte: self.byte_before(src, consumed, usize::from(bad) + usize::from(extra)),
            },
        };
        self.remember(&src[..consumed]);
        Outcome::new(step, consumed, written)
    }
}

/// Encodes UTF-8 into any `encoding_rs` encoding that has an encoder of its own.
///
/// Unmappable characters are reported as [`Step::Invalid`]. Converted characters that decode to
/// something else (e.g. `U+00A5` in EUC-JP) are counted in [`Outcome::non_reversible`].
#[derive(Debug)]
pub struct CharsetEncoder {
    encoder: DebuggableEncoder,
    reversible: HashMap<char, bool>,
}

impl CharsetEncoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoder: encoding.new_encoder().into(),
            reversible: HashMap::new(),
        }
    }

    fn is_reversible(&mut self, c: char) -> bool {
        if c.is_ascii() {
            return true;
        }
        let encoding = self.encoder.encoding();
        *self
            .reversible
            .entry(c)
            .or_insert_with(|| round_trips(encoding, c))
    }
}

/// Returns `true` if `c` encodes in `encoding` and decodes back to itself.
fn round_trips(encoding: &'static Encoding, c: char) -> bool {
    let mut utf8 = [0; 4];
    let utf8 = c.encode_utf8(&mut utf8);
    let mut encoded = [0; 16];
    let (result, _, n) =
        encoding
            .new_encoder()
            .encode_from_utf8_without_replacement(utf8, &mut encoded, true);
    if result != EncoderResult::InputEmpty {
        return false;
    }
    let mut decoded = [0; 16];
    let (result, _, m) = encoding
        .new_decoder_without_bom_handling()
        .decode_to_utf8_without_replacement(&encoded[..n], &mut decoded, true);
    result == DecoderResult::InputEmpty && &decoded[..m] == utf8.as_bytes()
}

impl Transcode for CharsetEncoder {
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome {
        let s = match valid_head(src, last) {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        // only the final call may finish the encoder
        let last = last && s.len() == src.len();
        let (result, consumed, written) = self
            .encoder
            .encode_from_utf8_without_replacement(s, dst, last);
        let (step, converted) = match result {
            EncoderResult::InputEmpty => (Step::InputEmpty, &s[..consumed]),
            EncoderResult::OutputFull => (Step::OutputFull, &s[..consumed]),
            EncoderResult::Unmappable(c) => {
                let mut utf8 = [0; 4];
                c.encode_utf8(&mut utf8);
                (
                    Step::Invalid { byte: utf8[0] },
                    &s[..consumed - c.len_utf8()],
                )
            }
        };
        let non_reversible = converted
            .chars()
            .filter(|&c| !self.is_reversible(c))
            .count();
        Outcome {
            step,
            consumed,
            written,
            non_reversible,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

impl Endian {
    fn put_u16(self, v: u16, dst: &mut [u8]) {
        dst[..2].copy_from_slice(&match self {
            Endian::Big => v.to_be_bytes(),
            Endian::Little => v.to_le_bytes(),
        });
    }

    fn put_u32(self, v: u32, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&match self {
            Endian::Big => v.to_be_bytes(),
            Endian::Little => v.to_le_bytes(),
        });
    }

    fn get_u32(self, b: [u8; 4]) -> u32 {
        match self {
            Endian::Big => u32::from_be_bytes(b),
            Endian::Little => u32::from_le_bytes(b),
        }
    }
}

/// Encodes the valid head of `src` one character at a time with `put`, which returns the number
/// of bytes written or `None` when `dst` is too short.
fn encode_chars(
    src: &[u8],
    dst: &mut [u8],
    last: bool,
    mut put: impl FnMut(char, &mut [u8]) -> Option<usize>,
) -> Outcome {
    let s = match valid_head(src, last) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };
    let (mut consumed, mut written) = (0, 0);
    for c in s.chars() {
        match put(c, &mut dst[written..]) {
            Some(n) => {
                consumed += c.len_utf8();
                written += n;
            }
            None => return Outcome::new(Step::OutputFull, consumed, written),
        }
    }
    Outcome::new(Step::InputEmpty, consumed, written)
}

/// Encodes UTF-8 into UTF-16, which `encoding_rs` only decodes.
#[derive(Debug)]
struct Utf16Encoder(Endian);

impl Transcode for Utf16Encoder {
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome {
        let endian = self.0;
        encode_chars(src, dst, last, |c, dst| {
            let mut units = [0; 2];
            let units = c.encode_utf16(&mut units);
            let n = units.len() * 2;
            if dst.len() < n {
                return None;
            }
            for (unit, out) in units.iter().zip(dst.chunks_exact_mut(2)) {
                endian.put_u16(*unit, out);
            }
            Some(n)
        })
    }
}

/// Encodes UTF-8 into UTF-32.
#[derive(Debug)]
struct Utf32Encoder(Endian);

impl Transcode for Utf32Encoder {
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome {
        let endian = self.0;
        encode_chars(src, dst, last, |c, dst| {
            if dst.len() < 4 {
                return None;
            }
            endian.put_u32(u32::from(c), dst);
            Some(4)
        })
    }
}

/// Decodes UTF-32 into UTF-8. Surrogates and values above U+10FFFF are invalid 4-byte units.
#[derive(Debug)]
struct Utf32Decoder(Endian);

impl Transcode for Utf32Decoder {
    fn transcode(&mut self, src: &[u8], dst: &mut [u8], last: bool) -> Outcome {
        let (mut consumed, mut written) = (0, 0);
        while let Some(unit) = src.get(consumed..consumed + 4) {
            let value = self.0.get_u32([unit[0], unit[1], unit[2], unit[3]]);
            let Some(c) = char::from_u32(value) else {
                return Outcome::new(Step::Invalid { byte: unit[0] }, consumed + 4, written);
            };
            if dst.len() - written < c.len_utf8() {
                return Outcome::new(Step::OutputFull, consumed, written);
            }
            written += c.encode_utf8(&mut dst[written..]).len();
            consumed += 4;
        }
        if consumed == src.len() {
            Outcome::new(Step::InputEmpty, consumed, written)
        } else if last {
            Outcome::new(Step::Invalid { byte: src[consumed] }, src.len(), written)
        } else {
            Outcome::new(Step::Incomplete, consumed, written)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decoder_for, encoder_for, Charset, IdentityCopy, Outcome, Step, Transcode};

    #[test]
    fn identity_copy_stops_at_char_boundary() {
        let src = "aé".as_bytes();
        let mut dst = [0; 2];
        let out = IdentityCopy.transcode(src, &mut dst, false);
        assert_eq!(out, Outcome::new(Step::OutputFull, 1, 1));

        let mut dst = [0; 8];
        let out = IdentityCopy.transcode(&src[1..], &mut dst, false);
        assert_eq!(out, Outcome::new(Step::InputEmpty, 2, 2));
        assert_eq!(&dst[..2], "é".as_bytes());
    }

    #[test]
    fn identity_copy_invalid_and_incomplete() {
        let mut dst = [0; 8];
        let out = IdentityCopy.transcode(b"ab\xffc", &mut dst, false);
        assert_eq!(out, Outcome::new(Step::InputEmpty, 2, 2));
        let out = IdentityCopy.transcode(b"\xffc", &mut dst, false);
        assert_eq!(out, Outcome::new(Step::Invalid { byte: 0xff }, 1, 0));

        let out = IdentityCopy.transcode(b"\xe6\x97", &mut dst, false);
        assert_eq!(out, Outcome::new(Step::Incomplete, 0, 0));
        let out = IdentityCopy.transcode(b"\xe6\x97", &mut dst, true);
        assert_eq!(out, Outcome::new(Step::Invalid { byte: 0xe6 }, 2, 0));
    }

    #[test]
    fn identity_copy_invalid_unit_is_maximal_subpart() {
        let mut dst = [0; 8];
        let out = IdentityCopy.transcode(b"\xe6\x97x", &mut dst, false);
        assert_eq!(out, Outcome::new(Step::Invalid { byte: 0xe6 }, 2, 0));
        let out = IdentityCopy.transcode(b"\x97\x97", &mut dst, false);
        assert_eq!(out, Outcome::new(Step::Invalid { byte: 0x97 }, 1, 0));
    }

    #[test]
    fn charset_decoder_names_malformed_byte() {
        let mut d = decoder_for(Charset::from_label("Shift_JIS").unwrap()).unwrap();
        let mut dst = [0; 32];
        // 0x82 followed by a byte that cannot trail it
        let out = d.transcode(b"A\x82\x20", &mut dst, false);
        assert!(matches!(out.step, Step::Invalid { byte: 0x82 }));
        assert_eq!(&dst[..out.written], b"A");
    }

    #[test]
    fn charset_encoder_reports_unmappable_and_non_reversible() {
        let mut e = encoder_for(Charset::from_label("EUC-JP").unwrap()).unwrap();
        let mut dst = [0; 32];

        let out = e.transcode("¥1".as_bytes(), &mut dst, false);
        assert_eq!(out.step, Step::InputEmpty);
        assert_eq!(out.non_reversible, 1);
        assert_eq!(&dst[..out.written], b"\x5c1");

        let src = "x😂".as_bytes();
        let out = e.transcode(src, &mut dst, false);
        assert_eq!(out.step, Step::Invalid { byte: 0xf0 });
        assert_eq!(out.consumed, src.len());
        assert_eq!(&dst[..out.written], b"x");
    }

    #[test]
    fn wide_encoders() {
        let mut dst = [0; 16];
        let mut e = encoder_for(Charset::Utf16Le).unwrap();
        let out = e.transcode("a😂".as_bytes(), &mut dst, true);
        assert_eq!(out.step, Step::InputEmpty);
        assert_eq!(&dst[..out.written], &[0x61, 0x00, 0x3d, 0xd8, 0x02, 0xde]);

        let mut e = encoder_for(Charset::Utf16Be).unwrap();
        let out = e.transcode("a😂".as_bytes(), &mut dst[..4], true);
        assert_eq!(out, Outcome::new(Step::OutputFull, 1, 2));

        let mut e = encoder_for(Charset::Utf32Be).unwrap();
        let out = e.transcode("é".as_bytes(), &mut dst, true);
        assert_eq!(&dst[..out.written], &[0x00, 0x00, 0x00, 0xe9]);
    }

    #[test]
    fn utf32_decoder() {
        let mut d = decoder_for(Charset::Utf32Le).unwrap();
        let mut dst = [0; 16];

        let out = d.transcode(b"a\0\0\0\x02\xf6\x01\0b\0", &mut dst, false);
        assert_eq!(out, Outcome::new(Step::Incomplete, 8, 5));
        assert_eq!(&dst[..5], "a😂".as_bytes());

        let out = d.transcode(b"b\0", &mut dst, true);
        assert_eq!(out, Outcome::new(Step::Invalid { byte: b'b' }, 2, 0));

        let out = d.transcode(b"\x00\xd8\x00\x00", &mut dst, false);
        assert_eq!(out, Outcome::new(Step::Invalid { byte: 0x00 }, 4, 0));
    }

    #[test]
    fn unsupported_directions() {
        assert!(decoder_for(Charset::UtfEbcdic).is_err());
        assert!(encoder_for(Charset::UtfEbcdic).is_err());
        assert!(decoder_for(Charset::Utf16Be).is_ok());
    }
}
