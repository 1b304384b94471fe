//! Conversation context: turn history, outward window shaping, session store

mod history;
mod store;

pub use history::{
    CONTEXT_WINDOW_TURNS, ConversationHistory, ConversationTurn, OutwardMessage, Role,
    shape_window,
};
pub use store::{SessionHandle, SessionStore};
