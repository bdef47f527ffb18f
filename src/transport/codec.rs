//! NDJSON codec for session streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving peer cannot make us buffer without bound.
//!
//! A framed stream ends on the first decoder error, so per-line problems
//! (over-long lines, invalid UTF-8) are surfaced as [`Frame::Rejected`]
//! items instead. Only genuine I/O failures end the stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted inbound line length: 4 MiB.
///
/// Whole-document `openDiff` payloads carry two copies of a file, so the
/// limit is generous.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// One decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete UTF-8 line without its terminator.
    Line(String),
    /// A line that was dropped; the stream continues after it.
    Rejected(AppError),
}

/// Line codec shared by both ends of a session.
#[derive(Debug)]
pub struct EnvelopeCodec(LinesCodec);

impl EnvelopeCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode_eof(src))
    }
}

impl Encoder<String> for EnvelopeCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0
            .encode(item, dst)
            .map_err(|err| AppError::Io(err.to_string()))
    }
}

fn map_decoded(
    decoded: std::result::Result<Option<String>, LinesCodecError>,
) -> Result<Option<Frame>> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Rejected(
            AppError::Protocol("line too long".into()),
        ))),
        Err(LinesCodecError::Io(err)) if err.kind() == std::io::ErrorKind::InvalidData => Ok(
            Some(Frame::Rejected(AppError::Protocol(format!("invalid utf-8: {err}")))),
        ),
        Err(LinesCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
    }
}
