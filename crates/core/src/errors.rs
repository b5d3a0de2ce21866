use thiserror::Error;

use crate::{config::ConfigError, nlp::ResolutionError};

/// Failure classes surfaced through the connector lifecycle.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("handshake failure: {0}")]
    Handshake(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("upload failure: {0}")]
    Upload(String),
    #[error("resolution failure: {0}")]
    Resolution(String),
    #[error("lifecycle violation: {0}")]
    Lifecycle(String),
}

impl ConnectorError {
    /// Whether the failure ends the session rather than a single call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Handshake(_))
    }
}

impl From<ConfigError> for ConnectorError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<ResolutionError> for ConnectorError {
    fn from(value: ResolutionError) -> Self {
        Self::Resolution(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ConfigError;
    use crate::errors::ConnectorError;
    use crate::nlp::ResolutionError;

    #[test]
    fn config_error_maps_to_configuration() {
        let error = ConnectorError::from(ConfigError::Validation(
            "channel.region is required".to_owned(),
        ));

        assert!(matches!(error, ConnectorError::Configuration(ref message)
            if message.contains("channel.region")));
        assert!(error.is_fatal());
    }

    #[test]
    fn resolution_error_is_not_fatal() {
        let error = ConnectorError::from(ResolutionError::Backend("detect failed".to_owned()));
        assert!(matches!(error, ConnectorError::Resolution(_)));
        assert!(!error.is_fatal());
    }

    #[test]
    fn display_keeps_underlying_message() {
        let error = ConnectorError::Upload("GenerateUrlError: file too large".to_owned());
        assert_eq!(error.to_string(), "upload failure: GenerateUrlError: file too large");
    }
}
