use thiserror::Error;

use crate::types::ChannelUuid;

/// Bad or missing input. Surfaced to the adapter immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid urn '{urn}': {reason}")]
    InvalidUrn { urn: String, reason: &'static str },
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelUuid),
    #[error("no handler registered for channel type '{0}'")]
    UnknownChannelType(String),
    #[error("unknown status value '{0}'")]
    UnknownStatus(String),
    #[error("attachment {index} is not decodable: {reason}")]
    AttachmentNotDecodable { index: usize, reason: String },
    #[error("invalid payload: {0}")]
    Payload(String),
}

/// Errors that cross the adapter boundary.
///
/// Every other failure category (store outage, dispatch failure, cache
/// failure) degrades inside the pipeline and is never reported here.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no message found for status reference {0}")]
    NotFound(String),
    #[error("unable to write to store or spool: {0}")]
    Spool(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl IngestError {
    pub fn spool(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Spool(err.into())
    }

    /// Stable machine readable code reported to adapters.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Spool(_) => "spool",
        }
    }

    /// Only a double failure should make the provider retry the request.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Spool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err: IngestError = ValidationError::MissingField("from").into();
        assert_eq!(err.code(), "validation");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "missing required field 'from'");

        let err = IngestError::spool("disk full");
        assert_eq!(err.code(), "spool");
        assert!(err.is_retryable());
    }
}
