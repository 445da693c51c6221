//! Common error types shared by the low-level utilities
//!
//! Higher layers convert [`CommonError`] into their own error types at the
//! seam where they call into this crate; nothing above `calsync-common`
//! matches on these variants directly except to pick a domain variant.

use std::fmt;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Error variants produced by the shared utilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Configuration-related errors (bad key material, bad encoding)
    Config { message: String, field: Option<String> },

    /// Encryption failed
    Encrypt { message: String },

    /// Decryption failed or the payload was malformed
    Decrypt { message: String },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// Internal errors that shouldn't normally occur
    Internal { message: String, context: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => {
                if let Some(field) = field {
                    write!(f, "Configuration error in field '{}': {}", field, message)
                } else {
                    write!(f, "Configuration error: {}", message)
                }
            }
            Self::Encrypt { message } => write!(f, "Encryption failed: {}", message),
            Self::Decrypt { message } => write!(f, "Decryption failed: {}", message),
            Self::Serialization { message, format } => {
                if let Some(format) = format {
                    write!(f, "Serialization error ({}): {}", format, message)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
            Self::Internal { message, context } => {
                if let Some(ctx) = context {
                    write!(f, "Internal error in '{}': {}", ctx, message)
                } else {
                    write!(f, "Internal error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    pub fn encrypt<S: Into<String>>(message: S) -> Self {
        Self::Encrypt { message: message.into() }
    }

    pub fn decrypt<S: Into<String>>(message: S) -> Self {
        Self::Decrypt { message: message.into() }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<S: Into<String>, F: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a simple internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), context: None }
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("json", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_field_when_present() {
        let err = CommonError::config_field("encryption.key", "expected 32 bytes");
        assert_eq!(
            err.to_string(),
            "Configuration error in field 'encryption.key': expected 32 bytes"
        );
    }

    #[test]
    fn json_errors_convert_to_serialization() {
        let err: CommonError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(
            err,
            CommonError::Serialization { format: Some(ref f), .. } if f == "json"
        ));
    }
}
