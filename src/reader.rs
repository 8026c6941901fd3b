use std::io;

use tracing::debug;

use super::{
    buffer::GrowableBuffer,
    codec::{Step, Transcode},
    config::TranscodeOptions,
    ConversionError, Error, Result,
};

/// UTF-8 encoding of U+FFFD, written in place of each input unit that cannot be decoded.
const REPLACEMENT: &[u8] = "\u{FFFD}".as_bytes();

/// The input chunk must hold the longest partial unit carried over from the previous read.
const MIN_CHUNK_SIZE: usize = 8;

/// Text decoded by [`decode`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// One record per replacement character written, in input order.
    pub errors: Vec<ConversionError>,
    /// Input bytes consumed.
    pub bytes_read: u64,
}

/// Decodes everything `reader` yields into UTF-8 with `converter`.
///
/// Input is read in chunks of [`TranscodeOptions::chunk_size`]. The output buffer starts at
/// `size_hint` bytes (the on-disk length, when known) and grows in steps of
/// [`TranscodeOptions::grow_increment`] whenever the converter runs out of room, retrying the same
/// input position. Input units that cannot be decoded are replaced with U+FFFD and recorded in
/// [`Decoded::errors`]; a partial unit at the end of a chunk is carried over to the next one.
///
/// Reaching EOF ends the loop. A read error, or a converter that stops making progress, aborts
/// it and discards what was decoded.
///
/// # Examples
///
/// ```rust
/// use charstream::{codec, config::TranscodeOptions, reader, Charset};
///
/// let mut src: &[u8] = b"caf\xe9";
/// let mut converter = codec::decoder_for(Charset::from_label("latin1")?)?;
/// let decoded = reader::decode(&mut src, &mut converter, 4, &TranscodeOptions::default())?;
/// assert_eq!(decoded.text, "café");
/// # Ok::<(), charstream::Error>(())
/// ```
pub fn decode<R: io::Read + ?Sized>(
    reader: &mut R,
    converter: &mut dyn Transcode,
    size_hint: usize,
    options: &TranscodeOptions,
) -> Result<Decoded> {
    let chunk_size = options.chunk_size.max(MIN_CHUNK_SIZE);
    let initial = if size_hint > 0 { size_hint } else { chunk_size };
    let mut state = DecodeState {
        converter,
        output: GrowableBuffer::new(initial, options.grow_increment, options.max_output),
        errors: Vec::new(),
        consumed: 0,
    };

    let mut input = vec![0; chunk_size];
    let mut pending = 0;
    loop {
        let n = match reader.read(&mut input[pending..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        pending = state.convert(&mut input, pending + n, false)?;
    }
    let rest = state.convert(&mut input, pending, true)?;
    debug_assert_eq!(rest, 0);

    let DecodeState {
        output,
        errors,
        consumed,
        ..
    } = state;
    let text = String::from_utf8(output.into_filled()).map_err(|_| Error::ConversionFatal {
        consumed,
        reason: "converter produced invalid UTF-8",
    })?;
    debug!(
        bytes_read = consumed,
        decoded_length = text.len(),
        substitutions = errors.len(),
        "decoded stream"
    );
    Ok(Decoded {
        text,
        errors,
        bytes_read: consumed,
    })
}

struct DecodeState<'a> {
    converter: &'a mut dyn Transcode,
    output: GrowableBuffer,
    errors: Vec<ConversionError>,
    consumed: u64,
}

impl DecodeState<'_> {
    /// Converts `input[..len]`, returning the length of the partial unit moved to the front of
    /// `input` for the next round.
    fn convert(&mut self, input: &mut [u8], len: usize, last: bool) -> Result<usize> {
        let mut pos = 0;
        loop {
            let out = self
                .converter
                .transcode(&input[pos..len], self.output.unfilled(), last);
            pos += out.consumed;
            self.consumed += out.consumed as u64;
            self.output.advance(out.written);

            match out.step {
                Step::InputEmpty if pos == len => return Ok(0),
                Step::InputEmpty if out.consumed == 0 && out.written == 0 => {
                    return Err(self.fatal("converter stopped making progress"))
                }
                Step::InputEmpty => {}
                Step::OutputFull => self.output.grow()?,
                Step::Invalid { byte } => {
                    self.output.try_reserve(REPLACEMENT.len())?;
                    self.errors.push(ConversionError {
                        byte_value: byte,
                        output_offset: self.output.filled_len(),
                    });
                    self.output.extend_from_slice(REPLACEMENT)?;
                }
                Step::Incomplete if last => {
                    return Err(self.fatal("partial unit left at end of input"))
                }
                Step::Incomplete => {
                    input.copy_within(pos..len, 0);
                    return Ok(len - pos);
                }
            }
        }
    }

    fn fatal(&self, reason: &'static str) -> Error {
        Error::ConversionFatal {
            consumed: self.consumed,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{decode, Decoded, TranscodeOptions};
    use crate::{
        codec::{decoder_for, IdentityCopy, Outcome, Step, Transcode},
        Charset, ConversionError, Error,
    };

    /// Yields its bytes a few at a time, to split units across reads.
    struct Trickle<'a>(&'a [u8], usize);

    impl io::Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.0.len().min(buf.len()).min(self.1);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    fn decode_with(src: &[u8], label: &str, options: &TranscodeOptions) -> Decoded {
        let mut converter = decoder_for(Charset::from_label(label).unwrap()).unwrap();
        decode(&mut Trickle(src, 3), &mut converter, 0, options).unwrap()
    }

    #[test]
    fn replaces_invalid_bytes() {
        let d = decode_with(b"a\xffb", "UTF-8", &TranscodeOptions::default());
        assert_eq!(d.text, "a\u{FFFD}b");
        assert_eq!(
            d.errors,
            [ConversionError {
                byte_value: 0xff,
                output_offset: 1
            }]
        );
        assert_eq!(&d.text.as_bytes()[1..4], b"\xef\xbf\xbd");
        assert_eq!(d.bytes_read, 3);
    }

    #[test]
    fn carries_partial_units_across_reads() {
        let src = "日本語テキスト".as_bytes();
        let d = decode_with(src, "UTF-8", &TranscodeOptions::default());
        assert_eq!(d.text.as_bytes(), src);
        assert!(d.errors.is_empty());

        let src = b"\x93\xfa\x96\x7b\x8c\xea";
        let d = decode_with(src, "Shift_JIS", &TranscodeOptions::default());
        assert_eq!(d.text, "日本語");
    }

    #[test]
    fn broken_sequence_is_one_error() {
        // a lead byte and its continuation cut short by "x" are one unit
        let d = decode_with(b"a\xe6\x97xb", "UTF-8", &TranscodeOptions::default());
        assert_eq!(d.text, "a\u{FFFD}xb");
        assert_eq!(
            d.errors,
            [ConversionError {
                byte_value: 0xe6,
                output_offset: 1
            }]
        );

        // bytes that cannot start a sequence are a unit each
        let d = decode_with(b"\xff\xfe", "UTF-8", &TranscodeOptions::default());
        assert_eq!(d.text, "\u{FFFD}\u{FFFD}");
        assert_eq!(d.errors.len(), 2);
    }

    #[test]
    fn truncated_tail_is_one_error() {
        let d = decode_with(b"ok\xe6\x97", "UTF-8", &TranscodeOptions::default());
        assert_eq!(d.text, "ok\u{FFFD}");
        assert_eq!(d.errors.len(), 1);
        assert_eq!(d.errors[0].byte_value, 0xe6);

        let d = decode_with(b"ok\x82", "Shift_JIS", &TranscodeOptions::default());
        assert_eq!(d.text, "ok\u{FFFD}");
        assert_eq!(d.errors[0].output_offset, 2);
    }

    #[test]
    fn grows_from_tiny_buffer() {
        let options = TranscodeOptions {
            chunk_size: 8,
            grow_increment: 1,
            max_output: 1 << 20,
        };
        // every input byte becomes two output bytes
        let src = vec![0xe9; 1000];
        let mut converter = decoder_for(Charset::from_label("latin1").unwrap()).unwrap();
        let d = decode(&mut &src[..], &mut converter, 1, &options).unwrap();
        assert_eq!(d.text.len(), 2000);
        assert!(d.text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn output_limit_is_deterministic() {
        let options = TranscodeOptions {
            chunk_size: 64,
            grow_increment: 16,
            max_output: 100,
        };
        let src = vec![b'x'; 101];
        let e = decode(&mut &src[..], &mut IdentityCopy, 0, &options).unwrap_err();
        assert!(matches!(e, Error::OutputLimit { limit: 100 }));
    }

    #[test]
    fn stalled_converter_is_fatal() {
        struct Stuck;

        impl Transcode for Stuck {
            fn transcode(&mut self, _: &[u8], _: &mut [u8], _: bool) -> Outcome {
                Outcome {
                    step: Step::InputEmpty,
                    consumed: 0,
                    written: 0,
                    non_reversible: 0,
                }
            }
        }

        let e = decode(&mut &b"abc"[..], &mut Stuck, 0, &TranscodeOptions::default());
        assert!(matches!(e, Err(Error::ConversionFatal { consumed: 0, .. })));
    }

    #[test]
    fn read_error_aborts() {
        struct Failing;

        impl io::Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
        }

        let e = decode(&mut Failing, &mut IdentityCopy, 0, &TranscodeOptions::default());
        assert!(matches!(e, Err(Error::Io(_))));
    }
}
