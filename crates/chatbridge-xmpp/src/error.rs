//! Error types for the XP side.

use thiserror::Error;

/// Errors produced while driving an XP session or the HTTP upload
/// extension. Every site that surfaces one logs and drops it — per
/// the bridge-wide policy, a `ChatHandler` never propagates a failure
/// to the dispatcher.
#[derive(Debug, Error)]
pub enum XmppError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("session start timed out")]
    SessionStartTimeout,

    #[error("failed to join room {room}: {source}")]
    Join { room: String, source: String },

    #[error("http upload failed: {0}")]
    Upload(String),

    #[error("invalid jid: {0}")]
    InvalidJid(String),

    #[error("actor pool has no sessions available")]
    NoActors,
}

/// Convenience alias.
pub type XmppResult<T> = Result<T, XmppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_join() {
        let error = XmppError::Join {
            room: "room@conf.example.org".to_string(),
            source: "forbidden".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "failed to join room room@conf.example.org: forbidden"
        );
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<XmppError>();
    }
}
