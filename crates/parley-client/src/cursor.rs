//! Last-seen message id per channel.
//!
//! The cursor bounds every delta fetch: only messages newer than it are
//! requested, so poll cost follows the number of new messages rather than the
//! size of the channel.

use std::collections::HashMap;

use parley_shared::types::{ChannelId, Cursor, MessageId};

#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    cursors: HashMap<ChannelId, MessageId>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the cursor to `max(current, new_max)`. Returns whether it moved.
    pub fn advance(&mut self, channel: ChannelId, new_max: MessageId) -> bool {
        let current = self.cursors.entry(channel).or_insert(MessageId::ZERO);
        if new_max > *current {
            *current = new_max;
            true
        } else {
            false
        }
    }

    /// `MessageId::ZERO` for a channel nothing has been seen from.
    pub fn get(&self, channel: ChannelId) -> MessageId {
        self.cursors.get(&channel).copied().unwrap_or(MessageId::ZERO)
    }

    pub fn cursor(&self, channel: ChannelId) -> Cursor {
        Cursor {
            channel_id: channel,
            last_seen_id: self.get(channel),
        }
    }
}
