//! Conversation state owned by the orchestration loop

use crate::llm::{ModelRole, Turn, TurnRole, Usage};

use super::tokens::TokenLedger;

/// Default advisory context budget, in estimated tokens
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 200_000;

/// Ordered transcript plus per-role token counters
///
/// The transcript is append-only between resets. Nothing here locks: the
/// loop holds this by value and is its only writer.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
    tokens: TokenLedger,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Defensive copy of the transcript
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Clear the transcript and all four token counters together
    pub fn reset(&mut self) {
        self.turns.clear();
        self.tokens.reset();
    }

    pub fn record_usage(&mut self, role: ModelRole, usage: &Usage) {
        self.tokens.record(role, usage);
    }

    pub fn tokens(&self) -> &TokenLedger {
        &self.tokens
    }

    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(Turn::estimated_tokens).sum()
    }

    /// Drop the oldest turns until the estimate fits `max_tokens`
    ///
    /// Trimming always cuts at a user text turn so the transcript never opens
    /// with an orphaned tool result or assistant reply, and the newest user
    /// turn is never dropped. Returns how many turns were removed.
    pub fn enforce_budget(&mut self, max_tokens: usize) -> usize {
        let mut removed = 0;
        while self.estimated_tokens() > max_tokens {
            let Some(cut) = self.next_restart_point() else {
                break;
            };
            self.turns.drain(..cut);
            removed += cut;
        }
        removed
    }

    /// Index of the next plain user turn after the first one
    fn next_restart_point(&self) -> Option<usize> {
        self.turns
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, t)| t.role == TurnRole::User)
            .map(|(i, _)| i)
    }
}
