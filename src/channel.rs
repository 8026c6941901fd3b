use std::{
    fs::File,
    io::{self, PipeReader, PipeWriter, Read, Seek, SeekFrom, Write},
};

use tracing::{debug, warn};

use super::{
    config::Shell,
    filter::{FilterProcess, Pump},
    util::{self, HeaderBuffer},
    Error, Result,
};

/// Number of leading bytes of a filtered stream that remain replayable by [`ByteChannel::reset`].
pub const HEADER_CAPACITY: usize = 8 * 1024;

/// Whether a channel was opened for loading or for saving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Read,
    Write,
}

/// A byte stream over a file, either direct or through a filter command.
///
/// A filtered channel connects the file to a [`FilterProcess`] with two OS pipes. A pump thread
/// copies between the file and the filter's far side (file to standard input when reading,
/// standard output to file when writing), while this channel reads the filter's standard output
/// or writes its standard input. Reading and writing are done through [`io::Read`] and
/// [`io::Write`].
///
/// Pipes cannot seek, so a filtered read channel caches the first [`HEADER_CAPACITY`] bytes it
/// reads and can [`reset`](Self::reset) to any offset among them, as long as nothing past the
/// cache has been read yet. This is what lets [`peek`](Self::peek) look at the start of the
/// stream before decoding it from the beginning.
#[derive(Debug)]
pub struct ByteChannel {
    inner: Inner,
    size_hint: u64,
}

#[derive(Debug)]
enum Inner {
    Direct { file: File, role: Role },
    Piped(Piped),
}

#[derive(Debug)]
struct Piped {
    role: Role,
    process: FilterProcess,
    /// The filter's standard output, when reading.
    output: Option<PipeReader>,
    /// The filter's standard input, when writing.
    input: Option<PipeWriter>,
    pump: Option<Pump>,
    header: HeaderBuffer,
}

impl ByteChannel {
    /// Opens `source` for reading, through `filter_command` unless it is `None` or blank.
    pub fn open_for_read(source: File, filter_command: Option<&str>, shell: &Shell) -> Result<Self> {
        let size_hint = file_len(&source);
        let Some(command) = filter_command.map(str::trim).filter(|c| !c.is_empty()) else {
            debug!(size_hint, "opened channel for reading");
            return Ok(Self::direct(source, Role::Read, size_hint));
        };

        let (stdin_rx, stdin_tx) = io::pipe().map_err(Error::PipeCreateFailed)?;
        let (stdout_rx, stdout_tx) = io::pipe().map_err(Error::PipeCreateFailed)?;
        let process = FilterProcess::spawn(shell, command, stdin_rx, stdout_tx)?;
        let pump = Pump::spawn("charstream-feed", source, stdin_tx, |pipe: &mut PipeWriter| {
            pipe.flush()
        })?;
        debug!(%command, size_hint, "opened filtered channel for reading");
        Ok(Self {
            inner: Inner::Piped(Piped {
                role: Role::Read,
                process,
                output: Some(stdout_rx),
                input: None,
                pump: Some(pump),
                header: HeaderBuffer::with_capacity(HEADER_CAPACITY),
            }),
            size_hint,
        })
    }

    /// Opens `dest` for writing, through `filter_command` unless it is `None` or blank.
    pub fn open_for_write(dest: File, filter_command: Option<&str>, shell: &Shell) -> Result<Self> {
        let Some(command) = filter_command.map(str::trim).filter(|c| !c.is_empty()) else {
            debug!("opened channel for writing");
            return Ok(Self::direct(dest, Role::Write, 0));
        };

        let (stdin_rx, stdin_tx) = io::pipe().map_err(Error::PipeCreateFailed)?;
        let (stdout_rx, stdout_tx) = io::pipe().map_err(Error::PipeCreateFailed)?;
        let process = FilterProcess::spawn(shell, command, stdin_rx, stdout_tx)?;
        let pump = Pump::spawn("charstream-drain", stdout_rx, dest, |file: &mut File| {
            file.flush()?;
            file.sync_all()
        })?;
        debug!(%command, "opened filtered channel for writing");
        Ok(Self {
            inner: Inner::Piped(Piped {
                role: Role::Write,
                process,
                output: None,
                input: Some(stdin_tx),
                pump: Some(pump),
                header: HeaderBuffer::with_capacity(0),
            }),
            size_hint: 0,
        })
    }

    fn direct(file: File, role: Role, size_hint: u64) -> Self {
        Self {
            inner: Inner::Direct { file, role },
            size_hint,
        }
    }

    pub fn role(&self) -> Role {
        match &self.inner {
            Inner::Direct { role, .. } => *role,
            Inner::Piped(p) => p.role,
        }
    }

    pub fn is_piped(&self) -> bool {
        matches!(self.inner, Inner::Piped(_))
    }

    /// Returns the length of the underlying file when opened for reading, or 0 if unknown.
    ///
    /// For a filtered channel this is the length before filtering.
    pub fn size_hint(&self) -> u64 {
        self.size_hint
    }

    /// Moves the read position to `offset` bytes from the start of the stream.
    ///
    /// A filtered read channel can only move within the bytes cached so far, and only while
    /// nothing past [`HEADER_CAPACITY`] has been read; otherwise this fails with
    /// [`Error::ResetOutOfRange`]. A filtered write channel cannot move at all.
    pub fn reset(&mut self, offset: u64) -> Result<()> {
        match &mut self.inner {
            Inner::Direct { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                Ok(())
            }
            Inner::Piped(Piped {
                role: Role::Read,
                header,
                ..
            }) => header
                .rewind(offset)
                .map_err(|cached| Error::ResetOutOfRange { offset, cached }),
            Inner::Piped(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot rewind a filtered output channel",
            )
            .into()),
        }
    }

    /// Reads up to `max` bytes (at most [`HEADER_CAPACITY`]) from the start of the stream and
    /// rewinds to the start again.
    pub fn peek(&mut self, max: usize) -> Result<Vec<u8>> {
        self.reset(0)?;
        let mut buf = vec![0; max.min(HEADER_CAPACITY)];
        let n = util::read_up_to(&mut *self, &mut buf)?;
        buf.truncate(n);
        self.reset(0)?;
        Ok(buf)
    }

    /// Closes the channel, reporting the first failure while still attempting every step.
    ///
    /// A direct write channel is synced to disk. A filtered channel closes its end of the pipe,
    /// waits for the filter to exit and reports a non-zero exit as [`Error::FilterFailed`]. When
    /// writing, it then waits for the pump to copy the filter's remaining output into the file.
    /// When reading, the pump is left to finish on its own.
    ///
    /// There is no timeout: a filter that never exits blocks this call.
    pub fn close(self) -> Result<()> {
        match self.inner {
            Inner::Direct {
                file,
                role: Role::Write,
            } => Ok(file.sync_all()?),
            Inner::Direct { .. } => Ok(()),
            Inner::Piped(piped) => piped.close(),
        }
    }
}

impl Piped {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.header.read_to_slice(buf);
        if n > 0 {
            return Ok(n);
        }
        let output = self.output.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "channel is not readable")
        })?;
        let n = output.read(buf)?;
        self.header.absorb(&buf[..n]);
        Ok(n)
    }

    fn input(&mut self) -> io::Result<&mut PipeWriter> {
        self.input
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "channel is not writable"))
    }

    fn close(self) -> Result<()> {
        let Piped {
            role,
            process,
            output,
            input,
            pump,
            ..
        } = self;
        let command = process.command().to_owned();

        let mut first_error = None;
        let mut note = |result: Result<()>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(%command, error = %e, "further error while closing channel");
                }
            }
        };

        // the filter sees end-of-file once our end of its standard input is closed
        drop(input);
        drop(output);
        note(process.wait());
        match (role, pump) {
            (Role::Write, Some(pump)) => note(pump.join().map(drop).map_err(Error::from)),
            (Role::Read, Some(pump)) if pump.is_finished() => {
                if let Err(e) = pump.join() {
                    debug!(%command, error = %e, "feed pump ended early");
                }
            }
            // still blocked on the filter's input; it ends when the pipe breaks
            (Role::Read, Some(_detached)) => {}
            (_, None) => {}
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Read for ByteChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Direct { file, .. } => file.read(buf),
            Inner::Piped(p) => p.read(buf),
        }
    }
}

impl Write for ByteChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Direct { file, .. } => file.write(buf),
            Inner::Piped(p) => p.input()?.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Inner::Direct { file, .. } => file.flush(),
            Inner::Piped(p) => p.input()?.flush(),
        }
    }
}

fn file_len(file: &File) -> u64 {
    file.metadata().map_or(0, |m| m.len())
}
