//! Error taxonomy for the ingestion pipeline.
//!
//! Only [`IngestError`] ever reaches a producer. Alert and metrics errors are
//! logged where they happen and never propagate into ingestion.

use thiserror::Error;

/// Fatal to a single inbound stream, never to the process.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed reading on line {line}: {source}")]
    Decode {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("reading on line {line} is not valid utf-8")]
    InvalidUtf8 { line: u64 },

    #[error("reading on line {line} exceeds {max} bytes")]
    LineTooLong { line: u64, max: usize },
}

impl IngestError {
    /// True when the producer sent bad data, as opposed to the channel failing.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::InvalidUtf8 { .. } | Self::LineTooLong { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert endpoint returned status {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics exposition is not valid utf-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("window capacity must be at least 1")]
    ZeroCapacity,

    #[error("z-score threshold must be positive and finite, got {0}")]
    InvalidThreshold(f64),

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),
}
