use thiserror::Error;

/// Collaborator failures the pipeline logs and degrades past.
#[derive(Debug, Error)]
pub enum WakeError {
    #[error("history lookup for group {group_id} failed: {reason}")]
    History { group_id: String, reason: String },

    #[error("merge session for user {user_id} closed without a result")]
    SessionLost { user_id: String },
}
