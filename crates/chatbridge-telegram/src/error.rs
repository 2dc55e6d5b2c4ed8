//! Error types for the TG side.

use thiserror::Error;

/// Errors produced while talking to the TG HTTP API, mapped onto the
/// bridge-wide error taxonomy: transient network failures retry up to
/// a fixed cap, rate limiting retries unboundedly, everything else is
/// a typed, logged-and-dropped [`TelegramError::Api`].
#[derive(Debug, Error)]
pub enum TelegramError {
    /// A non-429 API error. `teloxide` parses TG's numeric `error_code`
    /// into a named [`teloxide::ApiError`] variant and does not carry
    /// the raw code back out, so this only keeps the description.
    #[error("telegram API error: {description}")]
    Api { description: String },

    /// Connection/timeout retries were exhausted (5 attempts).
    #[error("telegram request exhausted retries")]
    Exhausted,

    /// The response body could not be decoded.
    #[error("failed to decode telegram response: {0}")]
    Decode(String),
}

/// Convenience alias.
pub type TelegramResult<T> = Result<T, TelegramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_api() {
        let error = TelegramError::Api {
            description: "Bad Request".to_string(),
        };
        assert_eq!(error.to_string(), "telegram API error: Bad Request");
    }

    #[test]
    fn error_display_exhausted() {
        assert_eq!(
            TelegramError::Exhausted.to_string(),
            "telegram request exhausted retries"
        );
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TelegramError>();
    }
}
