//! Error types for the sync core and the backend client.

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("backend reply is unusable: {0}")]
    InvalidReply(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else if err.is_decode() {
            Self::Decode(err)
        } else {
            Self::Request(err)
        }
    }
}

/// Why an inbound realtime frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no \"type\" discriminator")]
    MissingType,

    #[error("\"{kind}\" frame is malformed: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("chat session has shut down")]
    Closed,
}
