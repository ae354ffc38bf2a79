use std::collections::{HashMap, HashSet};

use shared::{
    domain::UserId,
    protocol::{MessagePayload, PublicProfile},
};

/// Unread badge ceiling: counts render as "1".."4" and then "4+".
pub const UNREAD_DISPLAY_CEILING: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    /// No conversation open.
    Idle,
    /// A history fetch for the selected user is in flight.
    Loading,
    /// History applied (or the fetch failed; either way the view settles).
    Ready,
}

/// What happened to a pushed message when it was folded into local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    /// Same id already present; a message can arrive both over the push
    /// channel and inside a later history fetch.
    Duplicate,
    CountedUnread { user_id: UserId, count: u32 },
    /// Neither side of the message is the logged-in user.
    Discarded,
}

/// Client-side reconciliation state: the open conversation's ordered message
/// list, the roster, the online set, and capped unread counters. All
/// mutation happens behind one lock in `ChatClient`, so merges never race.
#[derive(Debug, Default)]
pub struct ChatState {
    pub auth_user: Option<PublicProfile>,
    pub users: Vec<PublicProfile>,
    pub online_users: HashSet<UserId>,
    pub selected_user: Option<UserId>,
    pub messages: Vec<MessagePayload>,
    unread: HashMap<UserId, u32>,
    phase: ConversationPhase,
    history_generation: u64,
}

impl Default for ConversationPhase {
    fn default() -> Self {
        ConversationPhase::Idle
    }
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    /// Folds a pushed message into local state. Messages for the open
    /// conversation are appended unless the id is already present; anything
    /// else bumps the other user's unread counter instead.
    pub fn merge_pushed_message(&mut self, message: MessagePayload) -> MergeOutcome {
        let Some(me) = self.auth_user.as_ref().map(|user| user.id) else {
            return MergeOutcome::Discarded;
        };
        let other = if message.sender_id == me {
            message.receiver_id
        } else if message.receiver_id == me {
            message.sender_id
        } else {
            return MergeOutcome::Discarded;
        };

        if self.selected_user == Some(other) {
            if self.messages.iter().any(|m| m.id == message.id) {
                return MergeOutcome::Duplicate;
            }
            self.messages.push(message);
            MergeOutcome::Appended
        } else {
            let entry = self.unread.entry(other).or_insert(0);
            // Saturate one past the ceiling so "more than the ceiling" stays
            // representable for the badge without unbounded growth.
            *entry = (*entry + 1).min(UNREAD_DISPLAY_CEILING + 1);
            MergeOutcome::CountedUnread {
                user_id: other,
                count: self.unread_count(other),
            }
        }
    }

    /// Appends the server's response to a send. Skipped when the selection
    /// moved while the request was in flight, and idempotent on id.
    pub fn append_sent_message(&mut self, message: MessagePayload) -> bool {
        if self.selected_user != Some(message.receiver_id) {
            return false;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn unread_count(&self, user_id: UserId) -> u32 {
        self.unread
            .get(&user_id)
            .copied()
            .unwrap_or(0)
            .min(UNREAD_DISPLAY_CEILING)
    }

    pub fn unread_badge(&self, user_id: UserId) -> Option<String> {
        let raw = self.unread.get(&user_id).copied().unwrap_or(0);
        if raw == 0 {
            None
        } else if raw > UNREAD_DISPLAY_CEILING {
            Some(format!("{UNREAD_DISPLAY_CEILING}+"))
        } else {
            Some(raw.to_string())
        }
    }

    /// Opens a conversation: resets that user's unread counter, clears the
    /// visible list, and hands back the generation token the fetch must
    /// present to apply its result.
    pub fn begin_history_fetch(&mut self, user_id: UserId) -> u64 {
        self.selected_user = Some(user_id);
        self.unread.remove(&user_id);
        self.messages.clear();
        self.phase = ConversationPhase::Loading;
        self.history_generation += 1;
        self.history_generation
    }

    /// Applies a finished history fetch, wholesale. A result from a
    /// superseded fetch (older generation or different selection) is
    /// dropped so it cannot overwrite the newer conversation.
    pub fn finish_history_fetch(
        &mut self,
        generation: u64,
        user_id: UserId,
        result: Option<Vec<MessagePayload>>,
    ) -> bool {
        if generation != self.history_generation || self.selected_user != Some(user_id) {
            return false;
        }
        if let Some(messages) = result {
            self.messages = messages;
        }
        self.phase = ConversationPhase::Ready;
        true
    }

    pub fn clear_selection(&mut self) {
        self.selected_user = None;
        self.messages.clear();
        self.phase = ConversationPhase::Idle;
        self.history_generation += 1;
    }

    /// Logout: back to the initial anonymous state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
