use thiserror::Error;

/// Failures surfaced by the core. Everything else (unparseable text,
/// removing a non-member, blacklisted mentions) is a soft condition.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not invited to channel {channel}")]
    NotInvited { channel: String },

    #[error("no message in history matches the edit pattern")]
    NoMatchingMessage,

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl CoreError {
    /// Persistence failures leave no in-memory trace, so the same message
    /// can simply be handled again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// The single line shown to users for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotInvited { .. } => "You must be invited to this room.",
            Self::NoMatchingMessage => "No message found that matches that pattern.",
            Self::Persistence(_) => "Sorry, something went wrong saving that. Please try again.",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_persistence_is_retryable() {
        assert!(CoreError::Persistence(anyhow::anyhow!("disk full")).is_retryable());
        assert!(!CoreError::NoMatchingMessage.is_retryable());
        assert!(
            !CoreError::NotInvited {
                channel: "party".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn persistence_keeps_source() {
        let err = CoreError::Persistence(anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "persistence failure: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }
}
