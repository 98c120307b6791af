//! Idempotent append of fetched deltas into a local, ascending message log.
//!
//! The local log is append-only and already ordered, so it is never re-sorted.
//! An entry whose id is at or below the current tail is dropped. That is the
//! same as dropping ids already present: the remote hands out ids in
//! increasing order, and a log is only filled from deltas that start at id 0
//! and continue from its own tail, so no id below the tail can be missing from
//! it. Overlapping fetch windows from retries or a send's catch-up therefore
//! merge to the same result as a single fetch.

use parley_shared::types::{Message, MessageId};

/// Merge `delta` into a copy of `existing`.
pub fn merge(existing: &[Message], delta: &[Message]) -> Vec<Message> {
    let mut merged = existing.to_vec();
    merge_into(&mut merged, delta.iter().cloned());
    merged
}

/// Append the unseen part of `delta` to `log` in ascending id order and
/// return how many entries were added.
pub fn merge_into(log: &mut Vec<Message>, delta: impl IntoIterator<Item = Message>) -> usize {
    let mut fresh: Vec<Message> = delta.into_iter().collect();
    fresh.sort_by_key(|m| m.id);
    fresh.dedup_by_key(|m| m.id);

    let tail = tail_id(log);
    let before = log.len();
    log.extend(fresh.into_iter().filter(|m| m.id > tail));
    log.len() - before
}

/// Id of the newest entry, `MessageId::ZERO` for an empty log.
pub fn tail_id(log: &[Message]) -> MessageId {
    log.last().map(|m| m.id).unwrap_or(MessageId::ZERO)
}

#[cfg(test)]
mod tests {
    use parley_shared::types::{ChannelId, Username};

    use super::*;

    fn msg(id: u64) -> Message {
        Message {
            id: MessageId(id),
            channel_id: ChannelId(1),
            sender: Username::new("alice").unwrap(),
            text: format!("message {id}"),
            created_at: None,
        }
    }

    fn log(ids: &[u64]) -> Vec<Message> {
        ids.iter().copied().map(msg).collect()
    }

    fn ids(messages: &[Message]) -> Vec<u64> {
        messages.iter().map(|m| m.id.0).collect()
    }

    #[test]
    fn test_overlapping_poll_window_changes_nothing() {
        let existing = log(&[1, 2, 3]);
        let merged = merge(&existing, &log(&[2, 3]));
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = log(&[1, 4, 6]);
        let delta = log(&[6, 7, 9]);
        let once = merge(&existing, &delta);
        let twice = merge(&once, &delta);
        assert_eq!(once, twice);
        assert_eq!(ids(&once), vec![1, 4, 6, 7, 9]);
    }

    #[test]
    fn test_overlap_count() {
        let existing = log(&[1, 2, 3, 4]);
        let delta = log(&[3, 4, 5, 6, 7]);
        let overlap = 2;
        let merged = merge(&existing, &delta);
        assert_eq!(merged.len(), existing.len() + delta.len() - overlap);
    }

    #[test]
    fn test_result_is_strictly_increasing() {
        let mut local = log(&[2, 5]);
        merge_into(&mut local, log(&[9, 7, 7, 3, 8]));
        assert_eq!(ids(&local), vec![2, 5, 7, 8, 9]);
        assert!(local.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_cursor_driven_deltas_rebuild_the_remote_log() {
        let remote = log(&[1, 2, 3, 5, 8]);
        let fetch = |since: MessageId| -> Vec<Message> {
            // Sloppy window: also returns the entry at the cursor.
            remote.iter().filter(|m| m.id >= since).take(2).cloned().collect()
        };

        let mut local = Vec::new();
        for _ in 0..6 {
            let delta = fetch(tail_id(&local));
            merge_into(&mut local, delta);
        }
        // Dropping ids at or below the tail dropped exactly the ids already held.
        assert_eq!(local, remote);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(&[], &[]).is_empty());
        assert_eq!(ids(&merge(&[], &log(&[1, 2]))), vec![1, 2]);
        assert_eq!(ids(&merge(&log(&[1, 2]), &[])), vec![1, 2]);
    }

    #[test]
    fn test_merge_into_reports_added_count() {
        let mut local = log(&[1]);
        assert_eq!(merge_into(&mut local, log(&[1, 2, 3])), 2);
        assert_eq!(merge_into(&mut local, log(&[1, 2, 3])), 0);
        assert_eq!(tail_id(&local), MessageId(3));
    }
}
