use anyhow::Result;

/// Access to the host's stored conversation.
///
/// Implementations may be slow or fail; callers treat a failure as "no
/// history" and never hold state locks across the call.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    /// The agent's most recent replies in the group, oldest first.
    async fn recent_replies(&self, group_id: &str, count: usize) -> Result<Vec<String>>;
}
