//! Error types for Mailsurge

use thiserror::Error;

/// Main error type for Mailsurge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Maximum of {0} concurrent campaigns reached")]
    CampaignLimit(usize),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Mailsurge
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::CampaignLimit(_) => 429,
            Error::RateLimited { .. } => 429,
            Error::Smtp(_) => 502,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::CampaignLimit(_) => "CAMPAIGN_LIMIT",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Smtp(_) => "SMTP_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Validation details, when this is a validation error
    pub fn validation_details(&self) -> Option<&[String]> {
        match self {
            Error::Validation(details) => Some(details),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation(vec!["x".into()]).status_code(), 400);
        assert_eq!(Error::NotFound("campaign".into()).status_code(), 404);
        assert_eq!(Error::CampaignLimit(3).status_code(), 429);
        assert_eq!(Error::Smtp("refused".into()).status_code(), 502);
    }

    #[test]
    fn test_validation_display_joins_details() {
        let err = Error::Validation(vec!["subject is empty".into(), "no recipients".into()]);
        assert_eq!(
            err.to_string(),
            "Validation failed: subject is empty; no recipients"
        );
    }
}
