//! Filtered, charset-aware file loading and saving for text editors
//!
//! This crate turns a file on disk into UTF-8 text and back. On the way in, the bytes may pass
//! through an external filter command (such as a decompressor), their encoding is detected from
//! a byte-order mark, a stored charset tag or a statistical UTF-8 scan, and they are decoded with
//! [`encoding_rs`] into a growing buffer, replacing undecodable input with U+FFFD. On the way
//! out, the text is encoded into the chosen encoding, skipping what cannot be represented, and
//! optionally passed through the filter's output command.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use charstream::{
//!     load_file, save_file, FilterRegistry, LoadOptions, MemoryTagStore, SaveOptions, Settings,
//!     TagUpdate,
//! };
//!
//! let settings = Settings::from_env()
//!     .with_filters(FilterRegistry::parse("GZip;*.gz;.gz;gzip -dc;gzip")?);
//! let tags = MemoryTagStore::new();
//!
//! let loaded = load_file(Path::new("notes.txt.gz"), &LoadOptions::default(), &settings, &tags)?;
//! println!("{} ({} replacements)", loaded.detected_encoding, loaded.errors.len());
//!
//! let options = SaveOptions {
//!     encoding: loaded.detected_encoding.name().to_owned(),
//!     write_bom: loaded.has_bom,
//!     tag: TagUpdate::Store,
//!     ..Default::default()
//! };
//! let saved = save_file(
//!     Path::new("notes.txt.gz"),
//!     loaded.text.as_bytes(),
//!     &options,
//!     &settings,
//!     &tags,
//! )?;
//! assert_eq!(saved.skipped, 0);
//! # Ok::<(), charstream::Error>(())
//! ```
//!
//! The building blocks are public as well: [`ByteChannel`] for direct or filtered byte streams
//! with peek and rewind, [`detect::detect`] for encoding detection, and [`reader::decode`] and
//! [`writer::encode`] for the streaming conversion loops over any [`codec::Transcode`].

#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
mod file;

pub mod channel;
pub mod codec;
pub mod config;
pub mod detect;
pub mod filter;
pub mod reader;
pub mod tags;
pub mod writer;

mod buffer;
mod charset;
mod util;

pub use channel::ByteChannel;
pub use charset::{Charset, BOM_TABLE};
pub use config::Settings;
pub use error::{ConversionError, Error, Result};
pub use file::{
    load_file, save_file, FilterChoice, LoadOptions, SaveOptions, SaveReport, TagUpdate,
    TranscodeResult,
};
pub use filter::{FilterRegistry, FilterSpec};
pub use tags::{CharsetTagStore, MemoryTagStore, NoTags};

#[cfg(test)]
mod tests;
