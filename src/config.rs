use std::{env, path::PathBuf};

use super::{detect::LocaleTable, filter::FilterRegistry};

/// Environment variables consulted for the current locale, in order of precedence.
const LOCALE_VARS: [&str; 3] = ["LC_ALL", "LC_CTYPE", "LANG"];

/// The command interpreter that filter commands are handed to, as `program arg "<command>"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shell {
    pub program: PathBuf,
    pub arg: String,
}

impl Shell {
    pub fn new(program: impl Into<PathBuf>, arg: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            arg: arg.into(),
        }
    }
}

impl Default for Shell {
    #[cfg(not(windows))]
    fn default() -> Self {
        Self::new("/bin/sh", "-c")
    }

    #[cfg(windows)]
    fn default() -> Self {
        Self::new("cmd", "/C")
    }
}

/// Buffer sizing for the streaming load and save loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// Size of the input chunk read from a channel on load, and of the initial output buffer on
    /// save.
    pub chunk_size: usize,
    /// Bytes added to the output buffer each time the converter reports it full.
    pub grow_increment: usize,
    /// Size the output buffer may never exceed.
    pub max_output: usize,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            grow_increment: 512,
            max_output: 1 << 30,
        }
    }
}

/// An immutable snapshot of everything a load or save consults besides its arguments.
///
/// The caller builds one from its preferences store and passes it by reference to each
/// [`load_file`](crate::load_file) and [`save_file`](crate::save_file) call.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub filters: FilterRegistry,
    /// Encoding used for files that carry no charset tag, when not overridden per call.
    pub default_charset: Option<String>,
    pub locales: LocaleTable,
    /// Locale name such as `"ja_JP.UTF-8"`, selecting the fallback encoding from `locales`.
    pub locale: Option<String>,
    pub shell: Shell,
    pub transcode: TranscodeOptions,
}

impl Settings {
    /// Returns default settings with the locale taken from the process environment.
    pub fn from_env() -> Self {
        Self {
            locale: locale_from(|name| env::var(name).ok()),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_default_charset(mut self, charset: impl Into<String>) -> Self {
        self.default_charset = Some(charset.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}

fn locale_from(var: impl Fn(&str) -> Option<String>) -> Option<String> {
    LOCALE_VARS
        .iter()
        .filter_map(|name| var(name))
        .find(|value| !value.is_empty())
}
