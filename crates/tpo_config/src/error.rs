//! Configuration errors.

/// Why `tpo.toml` or a platform name could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `tpo.toml` or a referenced platform config file could not be read.
    #[error("cannot read tpo configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// `tpo.toml` is not valid TOML or does not match the schema.
    #[error("malformed tpo.toml: {0}")]
    ParseError(String),

    /// A setting is present but unusable, such as a zero timeout.
    #[error("invalid setting: {0}")]
    ValidationError(String),

    /// A platform name is blank.
    #[error("invalid platform name '{0}'")]
    InvalidPlatform(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_the_file() {
        let err = ConfigError::ParseError("expected '=' at line 3".to_string());
        assert_eq!(err.to_string(), "malformed tpo.toml: expected '=' at line 3");
    }

    #[test]
    fn validation_error_message() {
        let err = ConfigError::ValidationError("exec.timeout_secs must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "invalid setting: exec.timeout_secs must be at least 1"
        );
    }

    #[test]
    fn io_error_converts() {
        let err: ConfigError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().starts_with("cannot read tpo configuration"));
    }
}
