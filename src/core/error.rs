use crate::core::state::Phase;
use thiserror::Error;

/// Banner text shown when story analysis fails.
pub const ANALYSIS_FAILED_MESSAGE: &str =
    "Could not analyze story. Please check API key or try again.";

/// Banner text shown when script generation fails.
pub const GENERATION_FAILED_MESSAGE: &str =
    "Something went wrong while creating your comic. Please check your API key and try again.";

/// Failure raised while talking to the generative backend.
///
/// Clients return these wrapped in `anyhow::Error`; use [`classify`] to get
/// them back out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ProviderError::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ProviderError::Transport(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        ProviderError::InvalidResponse(msg.into())
    }

    /// Only transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

pub fn classify(err: &anyhow::Error) -> Option<&ProviderError> {
    err.downcast_ref::<ProviderError>()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot handle `{event}` while {phase:?}")]
    InvalidTransition { phase: Phase, event: &'static str },
    #[error("story text is empty")]
    EmptyStory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_through_context() {
        let err: anyhow::Result<()> = Err(ProviderError::configuration("API_KEY not set").into());
        let err = err.context("analysis request").unwrap_err();

        assert_eq!(
            classify(&err),
            Some(&ProviderError::Configuration("API_KEY not set".to_string()))
        );
    }

    #[test]
    fn test_classify_foreign_error() {
        let err = anyhow::anyhow!("something else");
        assert!(classify(&err).is_none());
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(ProviderError::transport("reset").is_retryable());
        assert!(!ProviderError::configuration("no key").is_retryable());
        assert!(!ProviderError::invalid_response("bad json").is_retryable());
    }
}
