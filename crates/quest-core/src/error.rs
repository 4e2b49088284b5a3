use thiserror::Error;

/// Failure taxonomy shared by every service. Display text is safe to show to
/// end users except for `Storage`, see [`CoreError::user_message`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("you have already completed this task")]
    AlreadyCompleted,

    #[error("{0}")]
    InvalidState(String),

    /// A concurrent writer won and re-reading did not resolve it
    #[error("{0}")]
    Conflict(String),

    #[error("storage call timed out")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Message suitable for clients. Storage details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Storage(_) => "internal server error".to_string(),
            Self::Timeout => "service temporarily unavailable, please retry".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_details_are_hidden() {
        let err = CoreError::from(anyhow::anyhow!("disk I/O error at page 42"));
        assert_eq!(err.user_message(), "internal server error");
        assert!(err.to_string().contains("page 42"));

        let err = CoreError::PermissionDenied("mutual follow required".into());
        assert_eq!(err.user_message(), "mutual follow required");
    }
}
