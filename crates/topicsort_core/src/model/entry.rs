//! Entry model.

use crate::model::topic::{OwnerId, TopicId};
use serde::{Deserialize, Serialize};

/// Stable entry identifier.
pub type EntryId = i64;

/// A user's free-text record, optionally bound to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub owner_id: OwnerId,
    pub content: String,
    /// `None` means uncategorized.
    pub topic_id: Option<TopicId>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl Entry {
    pub fn is_uncategorized(&self) -> bool {
        self.topic_id.is_none()
    }
}
