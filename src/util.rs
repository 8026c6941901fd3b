use std::{fmt, io, ops, str};

use encoding_rs::{Decoder, Encoder};

/// A fixed-capacity cache of the first bytes of a stream, used to replay them after a rewind.
///
/// Bytes are appended while there is spare capacity and handed out again from `read_pos`.
/// Invariant: `read_pos <= len <= capacity`.
#[derive(Debug)]
pub(crate) struct HeaderBuffer {
    buf: Box<[u8]>,
    len: usize,
    read_pos: usize,
    /// Total bytes pulled from the underlying stream, cached or not.
    pulled: u64,
}

impl HeaderBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            len: 0,
            read_pos: 0,
            pulled: 0,
        }
    }

    /// Returns the number of cached bytes not yet handed out since the last rewind.
    pub fn pending(&self) -> usize {
        self.len - self.read_pos
    }

    /// Copies pending cached bytes into `buf`, returning the number of bytes copied.
    pub fn read_to_slice(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending().min(buf.len());
        buf[..n].copy_from_slice(&self.buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        n
    }

    /// Records bytes freshly pulled from the stream, caching as many as fit.
    pub fn absorb(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.pending(), 0, "absorbing while cached bytes are pending");
        let n = (self.buf.len() - self.len).min(bytes.len());
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        self.read_pos = self.len;
        self.pulled += bytes.len() as u64;
    }

    /// Moves the read position back to `offset`.
    ///
    /// Fails if `offset` lies beyond the cached bytes or if the stream has already been read
    /// past the cache, since the bytes in between could not be replayed.
    pub fn rewind(&mut self, offset: u64) -> Result<(), usize> {
        let cached = self.len as u64;
        if offset > cached || self.pulled > cached {
            return Err(self.len);
        }
        self.read_pos = offset as usize;
        Ok(())
    }
}

/// Fills `buf` from `reader` until it is full or the reader reports EOF.
pub(crate) fn read_up_to(reader: &mut impl io::Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Classification of the head of a byte slice that is supposed to hold UTF-8.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Utf8Prefix<'a> {
    /// The slice starts with at least one valid character (or is empty).
    Valid(&'a str),
    /// The slice starts with an invalid sequence of the given length.
    Invalid(usize),
    /// The slice holds nothing but the beginning of a character.
    Incomplete,
}

/// Splits off the longest valid UTF-8 prefix of `v`, or classifies what blocks it.
pub(crate) fn utf8_prefix(v: &[u8]) -> Utf8Prefix<'_> {
    match str::from_utf8(v) {
        Ok(s) => Utf8Prefix::Valid(s),
        Err(e) if e.valid_up_to() > 0 => {
            // SAFETY: `valid_up_to` marks the end of the validated prefix
            Utf8Prefix::Valid(unsafe { str::from_utf8_unchecked(&v[..e.valid_up_to()]) })
        }
        Err(e) => match e.error_len() {
            Some(len) => Utf8Prefix::Invalid(len),
            None => Utf8Prefix::Incomplete,
        },
    }
}

/// Implements `Debug` for `encoding_rs::Decoder` and `encoding_rs::Encoder`.
macro_rules! define_debuggable_coder {
    ($type_name:ident, $inner_type:ident) => {
        pub struct $type_name($inner_type);

        impl fmt::Debug for $type_name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($inner_type))
                    .field("encoding()", self.encoding())
                    .finish()
            }
        }

        impl From<$inner_type> for $type_name {
            fn from(value: $inner_type) -> Self {
                Self(value)
            }
        }

        impl ops::Deref for $type_name {
            type Target = $inner_type;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ops::DerefMut for $type_name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }
    };
}

define_debuggable_coder!(DebuggableDecoder, Decoder);
define_debuggable_coder!(DebuggableEncoder, Encoder);
