use std::io;

use tracing::debug;

use super::{
    buffer::GrowableBuffer,
    charset::Charset,
    codec::{self, Step, Transcode},
    config::TranscodeOptions,
    Error, Result,
};

const MIN_BUF_SIZE: usize = 32;

/// Summary of an [`encode`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeReport {
    /// Bytes handed to the writer, byte-order mark included.
    pub bytes_written: u64,
    /// Input units dropped because the destination encoding cannot represent them, or because
    /// they were not valid UTF-8.
    pub skipped: usize,
    /// Characters written whose encoding does not decode back to the same character.
    pub non_reversible: usize,
    pub bom_written: bool,
}

impl EncodeReport {
    /// Returns `true` if the written bytes would not decode back to the input text.
    pub fn is_lossy(&self) -> bool {
        self.skipped > 0 || self.non_reversible > 0
    }
}

/// Encodes UTF-8 `text` with `converter` and writes the result into `writer`.
///
/// `bom` is written first unless empty. The converter writes into an output buffer of
/// [`TranscodeOptions::chunk_size`] bytes, which is drained into `writer` whenever the converter
/// reports it full; a single unit that does not fit an empty buffer grows it instead. Input units
/// the converter cannot encode are skipped and counted. Once the input is exhausted, the converter
/// is called once more with no input to flush any pending shift state.
///
/// The writer is not flushed.
///
/// # Examples
///
/// ```rust
/// use charstream::{codec, config::TranscodeOptions, writer, Charset};
///
/// let charset = Charset::from_label("Shift_JIS")?;
/// let mut converter = codec::encoder_for(charset)?;
/// let mut dst = Vec::new();
/// let report = writer::encode(
///     "天気 🌤".as_bytes(),
///     &mut dst,
///     &mut converter,
///     charset.bom(),
///     &TranscodeOptions::default(),
/// )?;
/// assert_eq!(dst, b"\x93\x56\x8b\x43 ");
/// assert_eq!(report.skipped, 1);
/// # Ok::<(), charstream::Error>(())
/// ```
pub fn encode<W: io::Write + ?Sized>(
    text: &[u8],
    writer: &mut W,
    converter: &mut dyn Transcode,
    bom: &[u8],
    options: &TranscodeOptions,
) -> Result<EncodeReport> {
    let mut report = EncodeReport::default();
    if !bom.is_empty() {
        writer.write_all(bom)?;
        report.bytes_written += bom.len() as u64;
        report.bom_written = true;
    }

    let mut output = GrowableBuffer::new(
        options.chunk_size.max(MIN_BUF_SIZE),
        options.grow_increment,
        options.max_output,
    );
    let mut pos = 0;
    let mut last = false;
    loop {
        let out = converter.transcode(&text[pos..], output.unfilled(), last);
        pos += out.consumed;
        output.advance(out.written);
        report.non_reversible += out.non_reversible;

        match out.step {
            Step::InputEmpty if pos == text.len() => {
                if last {
                    break;
                }
                // one more call with no input flushes the converter
                last = true;
            }
            Step::InputEmpty if out.consumed == 0 && out.written == 0 => {
                return Err(Error::ConversionFatal {
                    consumed: pos as u64,
                    reason: "converter stopped making progress",
                })
            }
            Step::InputEmpty => {}
            Step::OutputFull if output.filled_len() > 0 => {
                drain(writer, &mut output, &mut report)?;
            }
            Step::OutputFull => output.grow()?,
            Step::Invalid { .. } => report.skipped += 1,
            // the text ends mid-character; the next call reports the fragment as invalid
            Step::Incomplete => last = true,
        }
    }
    drain(writer, &mut output, &mut report)?;

    debug!(
        bytes_written = report.bytes_written,
        skipped = report.skipped,
        non_reversible = report.non_reversible,
        bom = report.bom_written,
        "encoded text"
    );
    Ok(report)
}

fn drain<W: io::Write + ?Sized>(
    writer: &mut W,
    output: &mut GrowableBuffer,
    report: &mut EncodeReport,
) -> io::Result<()> {
    writer.write_all(output.filled())?;
    report.bytes_written += output.filled_len() as u64;
    output.clear();
    Ok(())
}

/// Encodes `text` into `charset` without writing anything, to learn in advance whether a save
/// would skip or alter characters.
pub fn probe(text: &[u8], charset: Charset, options: &TranscodeOptions) -> Result<EncodeReport> {
    let mut converter = codec::encoder_for(charset)?;
    encode(text, &mut io::sink(), &mut converter, &[], options)
}

#[cfg(test)]
mod tests {
    use super::{encode, probe, EncodeReport, TranscodeOptions};
    use crate::{codec::encoder_for, Charset};

    fn encode_to_vec(text: &str, label: &str, bom: bool) -> (Vec<u8>, EncodeReport) {
        let charset = Charset::from_label(label).unwrap();
        let mut converter = encoder_for(charset).unwrap();
        let bom = if bom { charset.bom() } else { &[] };
        let mut dst = Vec::new();
        let report = encode(
            text.as_bytes(),
            &mut dst,
            &mut converter,
            bom,
            &TranscodeOptions::default(),
        )
        .unwrap();
        (dst, report)
    }

    #[test]
    fn writes_bom_when_defined() {
        let (dst, report) = encode_to_vec("hi", "UTF-16LE", true);
        assert_eq!(dst, b"\xff\xfeh\0i\0");
        assert!(report.bom_written);
        assert_eq!(report.bytes_written, 6);

        let (dst, report) = encode_to_vec("hi", "UTF-8", true);
        assert_eq!(dst, b"\xef\xbb\xbfhi");
        assert!(report.bom_written);

        let (dst, report) = encode_to_vec("hé", "ISO-8859-1", true);
        assert_eq!(dst, b"h\xe9");
        assert!(!report.bom_written);
    }

    #[test]
    fn skips_unmappable_characters() {
        let (dst, report) = encode_to_vec("a€ b", "ISO-8859-2", false);
        assert_eq!(dst, b"a b");
        assert_eq!(report.skipped, 1);
        assert!(report.is_lossy());
    }

    #[test]
    fn skips_invalid_utf8() {
        let mut converter = encoder_for(Charset::Utf16Be).unwrap();
        let mut dst = Vec::new();
        let report = encode(
            b"a\xffb\xe6\x97",
            &mut dst,
            &mut converter,
            &[],
            &TranscodeOptions::default(),
        )
        .unwrap();
        assert_eq!(dst, b"\0a\0b");
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn flushes_shift_state() {
        let (dst, report) = encode_to_vec("日本", "ISO-2022-JP", false);
        assert_eq!(dst, b"\x1b$BF|K\\\x1b(B");
        assert!(!report.is_lossy());
    }

    #[test]
    fn drains_through_small_buffer() {
        let options = TranscodeOptions {
            chunk_size: 0,
            grow_increment: 1,
            max_output: 64,
        };
        let text = "ü".repeat(500);
        let mut converter = encoder_for(Charset::Utf32Le).unwrap();
        let mut dst = Vec::new();
        let report = encode(text.as_bytes(), &mut dst, &mut converter, &[], &options).unwrap();
        assert_eq!(dst.len(), 2000);
        assert_eq!(report.bytes_written, 2000);
        assert_eq!(&dst[..4], b"\xfc\0\0\0");
    }

    #[test]
    fn counts_non_reversible() {
        let probe_in = |text: &str, label: &str| {
            probe(
                text.as_bytes(),
                Charset::from_label(label).unwrap(),
                &TranscodeOptions::default(),
            )
            .unwrap()
        };

        let report = probe_in("¥100", "EUC-JP");
        assert_eq!(report.non_reversible, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.bytes_written, 4);

        let report = probe_in("−1", "Shift_JIS");
        assert_eq!(report.non_reversible, 1);

        let report = probe_in("ｱ", "ISO-2022-JP");
        assert_eq!(report.non_reversible, 1);

        let report = probe_in("plain", "utf-8");
        assert!(!report.is_lossy());
    }
}
