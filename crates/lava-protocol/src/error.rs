//! Error types for decoding scheduler payloads.

/// Errors raised while decoding RPC responses, identifiers or feed events.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed XML at byte {offset}: {message}")]
    Xml { offset: usize, message: String },

    #[error("unexpected XML-RPC payload: {0}")]
    Unexpected(String),

    #[error("unknown job status: {0}")]
    UnknownStatus(String),

    #[error("invalid job identifier: {0}")]
    InvalidJobId(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

impl ProtocolError {
    pub(crate) fn xml(offset: usize, message: impl Into<String>) -> Self {
        Self::Xml {
            offset,
            message: message.into(),
        }
    }
}
