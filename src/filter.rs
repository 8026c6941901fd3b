//! External filter commands: their definitions, the registry they are looked up in, and the
//! child process and pump threads that run one.

use std::{
    fmt, io, mem,
    path::Path,
    process::{Child, Command, Stdio},
    str::FromStr,
    thread::{self, JoinHandle},
};

use tracing::{debug, warn};

use super::{config::Shell, Error, Result};

/// Which way bytes flow through a filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// From the file on disk into the editor (e.g. decompression).
    Input,
    /// From the editor onto disk (e.g. compression).
    Output,
}

/// A filter definition, written as the line `name;pattern;extension;input_command;output_command`.
///
/// `pattern` holds one or more file name patterns separated by whitespace or commas, using `*`
/// for any run of characters and `?` for any single character. An empty command disables the
/// filter in that direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterSpec {
    pub name: String,
    pub match_pattern: String,
    pub default_extension: String,
    pub input_command: String,
    pub output_command: String,
}

impl FilterSpec {
    /// Returns the command for `direction`, or `None` if it is blank.
    pub fn command(&self, direction: Direction) -> Option<&str> {
        let command = match direction {
            Direction::Input => &self.input_command,
            Direction::Output => &self.output_command,
        };
        Some(command.trim()).filter(|c| !c.is_empty())
    }

    /// Returns `true` if the file name of `path` matches any of the patterns.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.match_pattern
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|p| !p.is_empty())
            .any(|p| wildcard_match(p, name))
    }
}

impl FromStr for FilterSpec {
    type Err = Error;

    /// Parses a definition line. A sixth `;` and anything after it belong to the output command.
    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.splitn(5, ';').map(str::trim).collect();
        match fields[..] {
            [name, pattern, extension, input, output] if !name.is_empty() => Ok(Self {
                name: name.to_owned(),
                match_pattern: pattern.to_owned(),
                default_extension: extension.to_owned(),
                input_command: input.to_owned(),
                output_command: output.to_owned(),
            }),
            _ => Err(Error::InvalidFilterSpec {
                line: line.to_owned(),
            }),
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{};{}",
            self.name,
            self.match_pattern,
            self.default_extension,
            self.input_command,
            self.output_command
        )
    }
}

/// Matches `text` against a pattern of literal characters, `*` and `?`.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // position of the last `*` seen and the text position it currently stands in for
    let mut backtrack = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// An ordered list of filter definitions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterRegistry {
    filters: Vec<FilterSpec>,
}

impl FilterRegistry {
    pub fn new(filters: impl IntoIterator<Item = FilterSpec>) -> Self {
        Self {
            filters: filters.into_iter().collect(),
        }
    }

    /// Parses one definition per line, ignoring blank lines and lines starting with `#`.
    pub fn parse(text: &str) -> Result<Self> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::parse::<FilterSpec>)
            .collect::<Result<Vec<_>>>()
            .map(|filters| Self { filters })
    }

    pub fn push(&mut self, filter: FilterSpec) {
        self.filters.push(filter);
    }

    /// Looks up a filter by name.
    pub fn find(&self, name: &str) -> Option<&FilterSpec> {
        self.filters.iter().find(|f| f.name == name)
    }

    /// Returns the first filter whose patterns match the file name of `path`.
    pub fn match_path(&self, path: &Path) -> Option<&FilterSpec> {
        self.filters.iter().find(|f| f.matches(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterSpec> {
        self.filters.iter()
    }
}

/// A running filter command.
///
/// The command line is handed to the [`Shell`] unparsed. When the shell cannot execute the
/// command it exits with status 126 or 127, which [`wait`](Self::wait) reports as
/// [`Error::FilterFailed`]. A process that is dropped without being waited for is killed and
/// reaped.
#[derive(Debug)]
pub struct FilterProcess {
    child: Option<Child>,
    command: String,
}

impl FilterProcess {
    /// Starts `command` with its standard input and output connected to `stdin` and `stdout`.
    /// Standard error is inherited.
    ///
    /// The pipe ends passed in are closed in this process once the child holds them, so that
    /// end-of-file propagates when the child exits. On failure they are closed as well.
    pub fn spawn(
        shell: &Shell,
        command: &str,
        stdin: impl Into<Stdio>,
        stdout: impl Into<Stdio>,
    ) -> Result<Self> {
        // dropping `Command` at the end of this function closes our copies of the pipe ends
        let mut cmd = Command::new(&shell.program);
        cmd.arg(&shell.arg)
            .arg(command)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::inherit());
        let child = cmd.spawn().map_err(|source| Error::SubprocessSpawnFailed {
            command: command.to_owned(),
            source,
        })?;
        debug!(pid = child.id(), %command, "spawned filter");
        Ok(Self {
            child: Some(child),
            command: command.to_owned(),
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Waits for the command to exit, failing if it did not exit successfully.
    pub fn wait(mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        debug!(command = %self.command, %status, "filter exited");
        if status.success() {
            Ok(())
        } else {
            Err(Error::FilterFailed {
                command: mem::take(&mut self.command),
                status,
            })
        }
    }
}

impl Drop for FilterProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!(command = %self.command, "killing filter that was not waited for");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// A background thread copying bytes between a pipe and a file, so that neither side of a filter
/// blocks the other.
///
/// The thread owns the descriptors it copies between and closes them when it ends. A failure
/// mid-copy only ends the thread; the other side of the pipe then sees end-of-file or a broken
/// pipe.
#[derive(Debug)]
pub(crate) struct Pump {
    handle: JoinHandle<io::Result<u64>>,
}

impl Pump {
    /// Starts a thread that copies `from` into `to` until `from` is exhausted, then runs `finish`
    /// on the destination.
    pub fn spawn<R, W>(
        name: &str,
        mut from: R,
        mut to: W,
        finish: fn(&mut W) -> io::Result<()>,
    ) -> Result<Self>
    where
        R: io::Read + Send + 'static,
        W: io::Write + Send + 'static,
    {
        let thread_name = name.to_owned();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let copied = io::copy(&mut from, &mut to).and_then(|n| finish(&mut to).map(|()| n));
                match &copied {
                    Ok(n) => debug!(pump = %thread_name, bytes = n, "pump finished"),
                    Err(e) => debug!(pump = %thread_name, error = %e, "pump stopped"),
                }
                copied
            })
            .map_err(Error::ThreadStartFailed)?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the copy to end, returning the number of bytes copied.
    pub fn join(self) -> io::Result<u64> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("pump thread panicked")))
    }
}
