use crate::{ImageId, SegmentId};

/// Result alias that carries the custom [`ClipCraftError`] type.
pub type Result<T> = std::result::Result<T, ClipCraftError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ClipCraftError {
    /// Free-form message for failures that do not fit a narrower variant.
    #[error("{0}")]
    Message(String),
    /// The media's codec or configuration cannot be decoded by the backend.
    #[error("unsupported codec `{codec}`: {reason}")]
    UnsupportedCodec { codec: String, reason: String },
    /// The container could not be parsed.
    #[error("demux error: {0}")]
    Demux(String),
    /// A chunk failed to decode. Fatal for the segment's current pass.
    #[error("decode error in segment {segment} at chunk {chunk}: {message}")]
    Decode {
        segment: SegmentId,
        chunk: usize,
        message: String,
    },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("unknown video segment {0}")]
    UnknownSegment(SegmentId),
    #[error("unknown image segment {0}")]
    UnknownImage(ImageId),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl ClipCraftError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn decode(segment: SegmentId, chunk: usize, message: impl Into<String>) -> Self {
        Self::Decode {
            segment,
            chunk,
            message: message.into(),
        }
    }

    pub fn unsupported(codec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedCodec {
            codec: codec.into(),
            reason: reason.into(),
        }
    }
}

impl From<&str> for ClipCraftError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ClipCraftError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
