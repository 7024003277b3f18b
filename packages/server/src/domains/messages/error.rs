use thiserror::Error;

/// Errors returned by the message operations to the delivery layer.
///
/// Event bus failures never appear here; they are logged where they happen.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User is not a member of this chat")]
    UserNotMemberOfChat,

    #[error("Message does not exist")]
    MessageDoesNotExist,

    #[error("Database error: {0:#}")]
    Database(#[source] anyhow::Error),
}

impl MessageError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        MessageError::InvalidInput(reason.into())
    }

    /// Wrap a store failure with the operation that hit it.
    pub fn database(context: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |e| MessageError::Database(e.context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_keeps_cause() {
        let err = MessageError::database("failed to create message")(anyhow::anyhow!(
            "connection reset"
        ));
        let rendered = err.to_string();
        assert!(rendered.contains("failed to create message"));
        assert!(rendered.contains("connection reset"));
    }
}
