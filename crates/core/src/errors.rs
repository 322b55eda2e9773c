use thiserror::Error;

use crate::flows::FlowTransitionError;

/// Fixed reply for a run that outlived its deadline.
pub const BUSY_REPLY: &str = "抱歉，麦麦有点忙，稍后再聊吧～";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Inference,
    Persistence,
    Deadline,
    Ingress,
    Configuration,
    Flow,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Persistence => "persistence",
            Self::Deadline => "deadline",
            Self::Ingress => "ingress",
            Self::Configuration => "configuration",
            Self::Flow => "flow",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("inference failure: {0}")]
    Inference(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("pipeline deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
}

impl ApplicationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Inference(_) => ErrorCategory::Inference,
            Self::Persistence(_) => ErrorCategory::Persistence,
            Self::DeadlineExceeded { .. } => ErrorCategory::Deadline,
            Self::MalformedEvent(_) => ErrorCategory::Ingress,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Flow(_) => ErrorCategory::Flow,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ConfigError;
    use crate::errors::{ApplicationError, ErrorCategory};
    use crate::storage::StoreError;

    #[test]
    fn each_failure_maps_to_its_category() {
        let cases = [
            (ApplicationError::Inference("status 503".to_owned()), ErrorCategory::Inference),
            (ApplicationError::Persistence("disk full".to_owned()), ErrorCategory::Persistence),
            (ApplicationError::DeadlineExceeded { elapsed_ms: 60_000 }, ErrorCategory::Deadline),
            (ApplicationError::MalformedEvent("no author".to_owned()), ErrorCategory::Ingress),
            (ApplicationError::Configuration("no token".to_owned()), ErrorCategory::Configuration),
        ];
        for (error, category) in cases {
            assert_eq!(error.category(), category);
        }
        assert_eq!(ErrorCategory::Deadline.as_str(), "deadline");
    }

    #[test]
    fn store_errors_are_persistence_failures() {
        let error = ApplicationError::from(StoreError::Serialization("users.json: eof".to_owned()));
        assert_eq!(error.category(), ErrorCategory::Persistence);
        assert!(error.to_string().contains("users.json: eof"));
    }

    #[test]
    fn config_errors_are_configuration_failures() {
        let error = ApplicationError::from(ConfigError::Validation(
            "channel.bot_token is required".to_owned(),
        ));
        assert_eq!(error.category(), ErrorCategory::Configuration);
    }
}
