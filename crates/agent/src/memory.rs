//! Conversation memory — the turn log and its conditioning window.
//!
//! The full log of completed turns is retained until the session resets
//! (it is what gets archived); only the most recent `window` turns are
//! rendered into model prompts. Turns are immutable once recorded.

use docpilot_core::message::Message;
use docpilot_core::turn::ChatTurn;

/// Ordered log of completed turns with a bounded conditioning window.
///
/// Owned exclusively by the session; cleared (not resized) on "new chat".
/// Not safe for concurrent writers — one turn at a time per session.
pub struct ConversationMemory {
    window: usize,
    turns: Vec<ChatTurn>,
}

impl ConversationMemory {
    /// `window` is how many recent turns condition each model call
    /// (default 10 at the session level).
    pub fn new(window: usize) -> Self {
        Self {
            window,
            turns: Vec::new(),
        }
    }

    /// Append a completed turn.
    pub fn record(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    /// Remove and return every recorded turn (for archiving).
    pub fn drain(&mut self) -> Vec<ChatTurn> {
        std::mem::take(&mut self.turns)
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Render the conditioning window as alternating user/assistant
    /// messages, oldest first.
    pub fn render_messages(&self) -> Vec<Message> {
        let start = self.turns.len().saturating_sub(self.window);
        let mut messages = Vec::with_capacity((self.turns.len() - start) * 2);
        for turn in &self.turns[start..] {
            messages.push(Message::user(&turn.user_input));
            messages.push(Message::assistant(&turn.response));
        }
        messages
    }

    pub fn last_turn(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> ChatTurn {
        ChatTurn::new(format!("question {i}"), format!("answer {i}"), i)
    }

    #[test]
    fn records_in_order() {
        let mut memory = ConversationMemory::new(10);
        memory.record(turn(0));
        memory.record(turn(1));
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.last_turn().unwrap().index, 1);
    }

    #[test]
    fn window_bounds_rendered_messages_not_the_log() {
        let mut memory = ConversationMemory::new(2);
        for i in 0..5 {
            memory.record(turn(i));
        }

        // Full log retained for archiving...
        assert_eq!(memory.len(), 5);

        // ...but only the last 2 turns condition the prompt.
        let messages = memory.render_messages();
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("question 3"));
        assert!(messages[3].content.contains("answer 4"));
    }

    #[test]
    fn drain_empties_and_returns_everything() {
        let mut memory = ConversationMemory::new(10);
        memory.record(turn(0));
        memory.record(turn(1));

        let drained = memory.drain();
        assert_eq!(drained.len(), 2);
        assert!(memory.is_empty());
    }

    #[test]
    fn clear_forgets_all_turns() {
        let mut memory = ConversationMemory::new(10);
        memory.record(turn(0));
        memory.clear();
        assert!(memory.is_empty());
        assert!(memory.render_messages().is_empty());
    }

    #[test]
    fn messages_alternate_user_assistant() {
        let mut memory = ConversationMemory::new(10);
        memory.record(turn(0));
        let messages = memory.render_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, docpilot_core::message::Role::User);
        assert_eq!(messages[1].role, docpilot_core::message::Role::Assistant);
    }
}
