pub mod error;
pub mod filelog;
pub mod types;

pub use error::{CoreError, Result};
pub use types::{
    ChatQueueKey, HistoryRole, HistoryRow, MediaRef, MessageKind, Model, ParsedMessage, Platform,
    ReplyContext, TokenUsageRow,
};
