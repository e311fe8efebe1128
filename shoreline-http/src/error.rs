use thiserror::Error;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request bytes could not be parsed as HTTP/1.1.
    #[error("malformed request: {0}")]
    Parse(String),
    /// The request head exceeded the decoder's size cap.
    #[error("request head too large ({0} bytes)")]
    HeadTooLarge(usize),
    /// The request method is not one this server dispatches.
    #[error("unsupported method {0}")]
    Method(String),
    /// `param` was called with a name the matched pattern does not capture.
    #[error("unknown parameter {0}")]
    UnknownParam(String),
    /// `splat_at` index past the captured splat list.
    #[error("splat index {0} out of range")]
    SplatIndex(usize),
    /// A captured parameter failed to parse as the requested type.
    #[error("invalid value {value:?} for parameter {name}")]
    BadParam { name: String, value: String },
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] shoreline::Error),
}
