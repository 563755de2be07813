//! Newline-delimited JSON framing for the inbound reading stream.
//!
//! A producer holds one request open and writes one JSON [`Reading`] per
//! line. Framing errors end the stream; blank lines are skipped.

use crate::error::IngestError;
use crate::reading::Reading;
use bytes::Bytes;
use futures::{Stream, StreamExt, future};
use std::io;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Decode a byte stream into readings, one per line.
pub fn decode_ndjson<S>(body: S, max_line_bytes: usize) -> impl Stream<Item = Result<Reading, IngestError>>
where
    S: Stream<Item = Result<Bytes, io::Error>>,
{
    let mut line = 0u64;

    FramedRead::new(
        StreamReader::new(body),
        LinesCodec::new_with_max_length(max_line_bytes),
    )
    .filter_map(move |frame| {
        line += 1;
        let item = match frame {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(
                serde_json::from_str::<Reading>(&text)
                    .map_err(|source| IngestError::Decode { line, source }),
            ),
            Err(LinesCodecError::MaxLineLengthExceeded) => Some(Err(IngestError::LineTooLong {
                line,
                max: max_line_bytes,
            })),
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Some(Err(IngestError::InvalidUtf8 { line }))
            }
            Err(LinesCodecError::Io(e)) => Some(Err(IngestError::Transport(e))),
        };
        future::ready(item)
    })
}
