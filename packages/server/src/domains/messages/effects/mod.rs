//! Message effects - work that follows a committed mutation
//!
//! - `reconcile`: event-bus handler keeping the chat preview consistent
//! - `fan_out`: push of message changes to online members

pub mod fan_out;
pub mod reconcile;

pub use fan_out::{fan_out, fan_out_detached, ChatFrame, DeletedMessages, EditedMessage, FanOutReport};
pub use reconcile::{reconcile_last_message, LastMessageReconciler};
