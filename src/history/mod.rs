pub mod adapter;
pub mod sqlite;
pub mod store;

pub use adapter::{reduce_history, ConversationAdapter, TurnHandle, TurnOutcome};
pub use sqlite::{ConversationDetail, ConversationInfo, HistoryStore};
pub use store::{ConversationStore, Role, StoredTurn, Turn};
