//! Timeline reconciliation.
//!
//! Messages reach a conversation from three places: the history load, the
//! direct request path and the realtime channel. All of them go through
//! [`merge`] (or [`Timeline::merge`]), which drops identifiers already present
//! and keeps the result ordered by timestamp. Messages with equal timestamps
//! stay in the order they were appended.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::models::{Message, MessageId};

/// Merge `incoming` into `current`, returning a new ordered sequence.
///
/// Incoming messages whose id is already present (in `current` or earlier in
/// `incoming`) are discarded, so re-delivery is a no-op.
pub fn merge(current: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut seen: HashSet<&MessageId> = current.iter().map(|m| &m.id).collect();
    let mut merged = current.to_vec();
    for message in incoming {
        if seen.insert(&message.id) {
            merged.push(message.clone());
        }
    }
    // sort_by_key is stable
    merged.sort_by_key(|m| m.timestamp);
    merged
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: Message,
}

/// Owned, incrementally reconciled timeline for one conversation.
///
/// Ordering key is `(timestamp, arrival sequence)`: the arrival sequence makes
/// the tie-break explicit instead of relying on sort stability across merges.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<Entry>,
    ids: HashSet<MessageId>,
    next_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut timeline = Self::new();
        timeline.merge(messages);
        timeline
    }

    /// Merge a batch, returning how many messages were inserted.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) -> usize {
        let mut inserted = 0;
        for message in incoming {
            if self.ids.contains(&message.id) {
                trace!(id = %message.id, "skipping already placed message");
                continue;
            }
            self.ids.insert(message.id.clone());
            self.entries.push(Entry {
                seq: self.next_seq,
                message,
            });
            self.next_seq += 1;
            inserted += 1;
        }
        if inserted > 0 {
            self.entries
                .sort_by_key(|entry| (entry.message.timestamp, entry.seq));
        }
        inserted
    }

    /// Insert a single message. Returns false if its id was already present.
    pub fn push(&mut self, message: Message) -> bool {
        self.merge(std::iter::once(message)) == 1
    }

    /// Swap an optimistic entry for the server-confirmed message and append
    /// the paired assistant reply.
    ///
    /// The confirmed message takes the optimistic entry's arrival slot, so a
    /// tie on timestamp with a later message still orders it first.
    pub fn replace_optimistic(&mut self, local_id: &MessageId, confirmed: Message, reply: Message) {
        match self.remove(local_id) {
            Some(seq) if !self.ids.contains(&confirmed.id) => {
                self.ids.insert(confirmed.id.clone());
                self.entries.push(Entry {
                    seq,
                    message: confirmed,
                });
                self.merge(std::iter::once(reply));
            }
            Some(_) => {
                debug!(id = %confirmed.id, "confirmed message already placed");
                self.merge(std::iter::once(reply));
            }
            None => {
                debug!(id = %local_id, "optimistic entry gone, merging confirmation");
                self.merge([confirmed, reply]);
            }
        }
        self.entries
            .sort_by_key(|entry| (entry.message.timestamp, entry.seq));
    }

    /// Rebuild from a fresh server history. Local entries are dropped except
    /// `keep`, the optimistic entry of a send still waiting on its result.
    pub fn replace_with(
        &mut self,
        history: impl IntoIterator<Item = Message>,
        keep: Option<&MessageId>,
    ) -> usize {
        let kept = keep.and_then(|id| self.get(id)).cloned();
        self.clear();
        self.merge(history.into_iter().chain(kept))
    }

    fn remove(&mut self, id: &MessageId) -> Option<u64> {
        let pos = self.entries.iter().position(|e| &e.message.id == id)?;
        let entry = self.entries.remove(pos);
        self.ids.remove(id);
        Some(entry.seq)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.iter().find(|m| &m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.next_seq = 0;
    }
}
