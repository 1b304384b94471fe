//! Conversation history and outward window shaping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing turns read when shaping an outward request
pub const CONTEXT_WINDOW_TURNS: usize = 10;

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse a wire role string. Anything that isn't "user" is treated as the
    /// assistant, matching how clients label replies.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("user") {
            Self::User
        } else {
            Self::Assistant
        }
    }

    /// Role marker used in outward context ("user" / "model")
    #[must_use]
    pub const fn outward_marker(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "model",
        }
    }
}

/// A single dialogue turn. Immutable once created; appended only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only ordered sequence of turns for one session
///
/// Unbounded for display purposes; outward requests read only the trailing
/// [`CONTEXT_WINDOW_TURNS`] entries via [`shape_window`].
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    /// Create an empty history
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a turn. Order of appends matches send order.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(ConversationTurn::new(role, content));
    }

    /// All turns in insertion order
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// A shaped message ready for the outward context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutwardMessage {
    pub role: &'static str,
    pub text: String,
}

/// Shape history into the outward context window
///
/// Keeps only the trailing `max_turns` entries in chronological order and
/// maps roles to outward markers (User → "user", Assistant → "model").
/// Pure function; an empty history yields an empty sequence.
#[must_use]
pub fn shape_window(turns: &[ConversationTurn], max_turns: usize) -> Vec<OutwardMessage> {
    let start = turns.len().saturating_sub(max_turns);
    turns[start..]
        .iter()
        .map(|t| OutwardMessage {
            role: t.role.outward_marker(),
            text: t.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                ConversationTurn::new(role, format!("turn {}", i + 1))
            })
            .collect()
    }

    #[test]
    fn shape_keeps_trailing_window_in_order() {
        let turns = history_of(12);
        let shaped = shape_window(&turns, CONTEXT_WINDOW_TURNS);

        assert_eq!(shaped.len(), 10);
        // Turns 1-2 excluded, 3-12 retained in original order
        assert_eq!(shaped[0].text, "turn 3");
        assert_eq!(shaped[9].text, "turn 12");
    }

    #[test]
    fn shape_maps_roles_to_outward_markers() {
        let turns = vec![
            ConversationTurn::new(Role::User, "hi"),
            ConversationTurn::new(Role::Assistant, "hello"),
        ];
        let shaped = shape_window(&turns, 10);

        assert_eq!(shaped[0].role, "user");
        assert_eq!(shaped[1].role, "model");
    }

    #[test]
    fn shape_empty_history_yields_empty_sequence() {
        assert!(shape_window(&[], CONTEXT_WINDOW_TURNS).is_empty());
    }

    #[test]
    fn shape_short_history_is_unchanged() {
        let turns = history_of(4);
        let shaped = shape_window(&turns, 10);
        assert_eq!(shaped.len(), 4);
        assert_eq!(shaped[0].text, "turn 1");
    }

    #[test]
    fn role_parse_defaults_to_assistant() {
        assert_eq!(Role::parse("user"), Role::User);
        assert_eq!(Role::parse("USER"), Role::User);
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse("model"), Role::Assistant);
    }

    #[test]
    fn history_append_preserves_order() {
        let mut history = ConversationHistory::new();
        history.append(Role::User, "one");
        history.append(Role::Assistant, "two");

        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].content, "one");
        assert_eq!(history.turns()[1].content, "two");
    }
}
