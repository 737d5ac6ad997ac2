//! NDJSON codec for ACP agent streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length (2 MiB default) to prevent memory exhaustion caused by
//! an unterminated or maliciously large line. A line over the limit fails
//! the connection with [`AppError::Protocol`]; everything else about
//! skip-on-parse-failure is handled one layer up in [`super::reader`], since
//! the codec's job is only framing, not JSON validation.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length: 2 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 2 * 1024 * 1024;

/// NDJSON codec for bidirectional ACP agent streams.
#[derive(Debug)]
pub struct AcpCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl AcpCodec {
    /// Create a codec with the default 2 MiB line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a codec with a caller-supplied line limit.
    #[must_use]
    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner
            .decode(src)
            .map_err(|err| map_codec_error(err, self.max_line_bytes))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner
            .decode_eof(src)
            .map_err(|err| map_codec_error(err, self.max_line_bytes))
    }
}

impl Encoder<String> for AcpCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner
            .encode(item, dst)
            .map_err(|err| map_codec_error(err, self.max_line_bytes))
    }
}

fn map_codec_error(err: LinesCodecError, max_line_bytes: usize) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line exceeded {max_line_bytes} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_line() {
        let mut codec = AcpCodec::new();
        let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\"}\n");
        let line = codec.decode(&mut buf).unwrap();
        assert_eq!(line.as_deref(), Some("{\"jsonrpc\":\"2.0\"}"));
    }

    #[test]
    fn buffers_a_partial_line() {
        let mut codec = AcpCodec::new();
        let mut buf = BytesMut::from("{\"jsonrpc\"");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_a_line_over_the_configured_limit() {
        let mut codec = AcpCodec::with_max_length(8);
        let mut buf = BytesMut::from("this line is much too long\n");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, AppError::Protocol(_)));
    }
}
