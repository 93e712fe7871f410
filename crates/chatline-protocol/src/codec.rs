//! Codec for newline-delimited protocol lines.
//!
//! Wraps [`LinesCodec`] and applies the protocol's newline escaping, so a
//! single logical line can carry multi-line text.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Default maximum inbound line length (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Errors that can occur while framing lines.
#[derive(Debug, Error)]
pub enum LineCodecError {
    /// Inbound line exceeded the configured maximum.
    #[error("Line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Escape newlines so the text fits on one line.
#[must_use]
pub fn escape(text: &str) -> String {
    text.replace('\n', "\\n")
}

/// Reverse [`escape`].
#[must_use]
pub fn unescape(line: &str) -> String {
    line.replace("\\n", "\n")
}

/// Line codec with newline escaping.
///
/// Decoded items are unescaped, encoded items are escaped and terminated
/// with `\n`. A trailing `\r` on input is dropped.
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    /// Create a codec with the default maximum line length.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec that rejects inbound lines longer than `max_length`.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// The maximum inbound line length.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_err(&self, err: LinesCodecError) -> LineCodecError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => LineCodecError::LineTooLong(self.max_length),
            LinesCodecError::Io(e) => LineCodecError::Io(e),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = LineCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LineCodecError> {
        match self.inner.decode(buf) {
            Ok(line) => Ok(line.map(|l| unescape(&l))),
            Err(e) => Err(self.map_err(e)),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LineCodecError> {
        match self.inner.decode_eof(buf) {
            Ok(line) => Ok(line.map(|l| unescape(&l))),
            Err(e) => Err(self.map_err(e)),
        }
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = LineCodecError;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), LineCodecError> {
        let escaped = escape(line.as_ref());
        buf.reserve(escaped.len() + 1);
        buf.extend_from_slice(escaped.as_bytes());
        buf.extend_from_slice(b"\n");
        Ok(())
    }
}
