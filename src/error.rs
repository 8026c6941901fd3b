use std::{io, path::PathBuf, process::ExitStatus};

/// The error type for load and save operations.
///
/// Channel setup failures (`ChannelOpenFailed`, `PipeCreateFailed`, `SubprocessSpawnFailed`,
/// `ThreadStartFailed`) and `UnsupportedEncoding` are reported before any byte is transcoded.
/// Invalid, incomplete and output-full conditions met while converting are recovered locally and
/// never surface here; only [`Error::ConversionFatal`], [`Error::OutputLimit`] and [`Error::Io`]
/// abort a conversion midway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file to read from or write to could not be opened.
    #[error("failed to open {path}: {source}")]
    ChannelOpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An OS pipe pair for a filter process could not be created.
    #[error("failed to create filter pipe: {0}")]
    PipeCreateFailed(#[source] io::Error),

    /// The command shell for a filter could not be started.
    #[error("failed to spawn filter command `{command}`: {source}")]
    SubprocessSpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The background pump thread of a filtered channel could not be started.
    #[error("failed to start pump thread: {0}")]
    ThreadStartFailed(#[source] io::Error),

    /// The named charset is unknown or cannot be used in the requested direction.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// The converter failed in a way that cannot be recovered from.
    #[error("conversion failed after {consumed} input bytes: {reason}")]
    ConversionFatal { consumed: u64, reason: &'static str },

    /// The output buffer would have to grow beyond the configured limit.
    #[error("output exceeds the limit of {limit} bytes")]
    OutputLimit { limit: usize },

    /// A filter command ran but did not exit successfully.
    #[error("filter command `{command}` {}", describe_exit(.status))]
    FilterFailed { command: String, status: ExitStatus },

    /// A piped channel was asked to rewind past the bytes it has cached.
    #[error("cannot rewind to offset {offset}: only {cached} bytes are replayable")]
    ResetOutOfRange { offset: u64, cached: usize },

    /// A filter was requested by a name the registry does not know.
    #[error("no filter named {0:?}")]
    UnknownFilter(String),

    /// A filter definition line is malformed.
    #[error("invalid filter definition: {line:?}")]
    InvalidFilterSpec { line: String },

    /// A read, write or close on the underlying descriptor failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` if this error was raised while setting up a filter, in which case a load
    /// may retry without the filter.
    pub fn is_filter_setup(&self) -> bool {
        matches!(
            self,
            Error::PipeCreateFailed(..)
                | Error::SubprocessSpawnFailed { .. }
                | Error::ThreadStartFailed(..)
        )
    }
}

// `sh -c` exits with 126 when the command is not executable and 127 when it is not found.
fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(126) | Some(127) => format!("could not be executed ({status})"),
        _ => format!("failed ({status})"),
    }
}

/// An input unit that could not be converted.
///
/// On load, each record marks a place where the replacement character (U+FFFD) was written:
/// `output_offset` is the offset of its first byte in the decoded text and `byte_value` is the
/// first byte of the offending input unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversionError {
    pub byte_value: u8,
    pub output_offset: usize,
}
