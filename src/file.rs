//! Loading a file into UTF-8 text and saving text back, end to end.

use std::{
    fs::{self, File},
    io::{self, Write as _},
    path::Path,
};

use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, warn};

use super::{
    channel::{ByteChannel, HEADER_CAPACITY},
    charset::Charset,
    codec,
    config::Settings,
    detect::detect,
    filter::Direction,
    reader,
    tags::CharsetTagStore,
    writer, ConversionError, Error, Result,
};

/// How a filter command is chosen for a file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FilterChoice {
    /// The first registered filter whose pattern matches the file name, if any.
    #[default]
    Auto,
    /// The registered filter with this name.
    Named(String),
    Disabled,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Encoding to decode with, overriding any charset tag and the default charset.
    pub encoding: Option<String>,
    pub filter: FilterChoice,
}

/// What to do with the file's charset tag after a save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TagUpdate {
    #[default]
    Keep,
    /// Store the encoding the file was saved in.
    Store,
    Remove,
}

#[derive(Clone, Debug)]
pub struct SaveOptions {
    pub encoding: String,
    /// Write a byte-order mark if the encoding defines one.
    pub write_bom: bool,
    pub filter: FilterChoice,
    pub tag: TagUpdate,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            encoding: Charset::Utf8.name().to_owned(),
            write_bom: false,
            filter: FilterChoice::Auto,
            tag: TagUpdate::Keep,
        }
    }
}

/// The outcome of [`load_file`].
#[derive(Debug)]
pub struct TranscodeResult {
    pub text: String,
    /// Length of `text` in bytes.
    pub decoded_length: usize,
    /// One record per input unit replaced with U+FFFD.
    pub errors: Vec<ConversionError>,
    pub detected_encoding: Charset,
    pub has_bom: bool,
    /// Why the filter could not be started, when the file was loaded unfiltered instead.
    pub filter_error: Option<Error>,
    /// A failure while closing the file or reaping the filter after decoding completed.
    pub close_error: Option<Error>,
}

/// The outcome of [`save_file`].
#[derive(Debug)]
pub struct SaveReport {
    pub bytes_written: u64,
    /// Characters dropped because the encoding cannot represent them.
    pub skipped: usize,
    /// Characters written that will not load back as the same character.
    pub non_reversible: usize,
    pub bom_written: bool,
    pub encoding: Charset,
    pub tag_error: Option<io::Error>,
}

/// Loads the file at `path` as UTF-8 text.
///
/// The file is passed through the input command of the chosen filter. If the filter cannot be
/// started, the file is loaded unfiltered and the reason is kept in
/// [`TranscodeResult::filter_error`]. The encoding is taken from `options`, else from the file's
/// charset tag, else from `settings`, and is then refined by [`detect`] from the first
/// [`HEADER_CAPACITY`] bytes. A byte-order mark is never part of the text.
pub fn load_file(
    path: &Path,
    options: &LoadOptions,
    settings: &Settings,
    tags: &dyn CharsetTagStore,
) -> Result<TranscodeResult> {
    let command = filter_command(settings, &options.filter, path, Direction::Input)?;
    let open = || {
        File::open(path).map_err(|source| Error::ChannelOpenFailed {
            path: path.to_owned(),
            source,
        })
    };

    let mut filter_error = None;
    let mut channel = match ByteChannel::open_for_read(open()?, command, &settings.shell) {
        Ok(channel) => channel,
        Err(e) if e.is_filter_setup() => {
            warn!(?path, error = %e, "filter unavailable; loading unfiltered");
            filter_error = Some(e);
            ByteChannel::open_for_read(open()?, None, &settings.shell)?
        }
        Err(e) => return Err(e),
    };

    let configured = options
        .encoding
        .clone()
        .or_else(|| tags.charset(path))
        .or_else(|| settings.default_charset.clone());
    let peek = channel.peek(HEADER_CAPACITY)?;
    let detection = detect(
        &peek,
        configured.as_deref(),
        &settings.locales,
        settings.locale.as_deref(),
    );
    let charset = Charset::from_label(&detection.encoding)?;
    let mut converter = codec::decoder_for(charset)?;

    channel.reset(detection.bom_len as u64)?;
    let size_hint = usize::try_from(channel.size_hint())
        .unwrap_or(usize::MAX)
        .saturating_sub(detection.bom_len);
    let decoded = reader::decode(&mut channel, &mut converter, size_hint, &settings.transcode)?;
    if !decoded.errors.is_empty() {
        warn!(
            ?path,
            encoding = charset.name(),
            substitutions = decoded.errors.len(),
            "replaced undecodable input"
        );
    }

    let close_error = channel.close().err();
    if let Some(e) = &close_error {
        warn!(?path, error = %e, "failed to close after loading");
    }
    debug!(
        ?path,
        encoding = charset.name(),
        has_bom = detection.has_bom,
        decoded_length = decoded.text.len(),
        "loaded file"
    );
    Ok(TranscodeResult {
        decoded_length: decoded.text.len(),
        text: decoded.text,
        errors: decoded.errors,
        detected_encoding: charset,
        has_bom: detection.has_bom,
        filter_error,
        close_error,
    })
}

/// Saves UTF-8 `text` to `path` in the encoding named by `options`.
///
/// The encoding is resolved before the file is touched. The bytes pass through the output
/// command of the chosen filter; unlike loading, a filter that cannot be started fails the save.
/// Characters the encoding cannot represent are skipped and counted in the report, as are bytes
/// of `text` that are not valid UTF-8. Use [`writer::probe`] to learn that before saving.
///
/// The bytes go to a temporary file in the same directory, which replaces `path` only once the
/// channel has closed cleanly. On any error, including a filter that exits unsuccessfully, the
/// existing file is left as it was.
pub fn save_file(
    path: &Path,
    text: &[u8],
    options: &SaveOptions,
    settings: &Settings,
    tags: &dyn CharsetTagStore,
) -> Result<SaveReport> {
    let charset = Charset::from_label(&options.encoding)?;
    let mut converter = codec::encoder_for(charset)?;
    let command = filter_command(settings, &options.filter, path, Direction::Output)?;

    let (file, staged) = stage(path)?;
    let mut channel = ByteChannel::open_for_write(file, command, &settings.shell)?;
    let bom = if options.write_bom { charset.bom() } else { &[] };
    let report = writer::encode(text, &mut channel, &mut converter, bom, &settings.transcode)?;
    channel.flush()?;
    if let Err(e) = channel.close() {
        warn!(?path, error = %e, "failed to close; keeping the existing file");
        return Err(e);
    }
    staged.persist(path).map_err(|e| Error::Io(e.error))?;

    if report.is_lossy() {
        warn!(
            ?path,
            encoding = charset.name(),
            skipped = report.skipped,
            non_reversible = report.non_reversible,
            "saved text does not round-trip"
        );
    }
    let tag_error = match options.tag {
        TagUpdate::Keep => None,
        TagUpdate::Store => tags.set_charset(path, Some(charset.name())).err(),
        TagUpdate::Remove => tags.set_charset(path, None).err(),
    };
    debug!(
        ?path,
        encoding = charset.name(),
        bytes_written = report.bytes_written,
        "saved file"
    );
    Ok(SaveReport {
        bytes_written: report.bytes_written,
        skipped: report.skipped,
        non_reversible: report.non_reversible,
        bom_written: report.bom_written,
        encoding: charset,
        tag_error,
    })
}

/// Creates the temporary file a save of `path` is written to, in the same directory so that it
/// can be renamed over `path`. Permissions of an existing file carry over.
///
/// Dropping the returned [`TempPath`] removes the file.
fn stage(path: &Path) -> Result<(File, TempPath)> {
    let open_failed = |source: io::Error| Error::ChannelOpenFailed {
        path: path.to_owned(),
        source,
    };
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let (file, staged) = NamedTempFile::new_in(dir).map_err(open_failed)?.into_parts();
    if let Ok(metadata) = fs::metadata(path) {
        file.set_permissions(metadata.permissions())
            .map_err(open_failed)?;
    }
    Ok((file, staged))
}

fn filter_command<'a>(
    settings: &'a Settings,
    choice: &FilterChoice,
    path: &Path,
    direction: Direction,
) -> Result<Option<&'a str>> {
    let spec = match choice {
        FilterChoice::Disabled => return Ok(None),
        FilterChoice::Auto => settings.filters.match_path(path),
        FilterChoice::Named(name) => Some(
            settings
                .filters
                .find(name)
                .ok_or_else(|| Error::UnknownFilter(name.clone()))?,
        ),
    };
    Ok(spec.and_then(|s| s.command(direction)))
}
