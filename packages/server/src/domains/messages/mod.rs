//! Messages domain - the message lifecycle
//!
//! Architecture:
//!   HTTP route → action (validate → membership → store) → detached event publish
//!                                                       → detached fan-out to online members
//!   event bus → LastMessageReconciler → chat last-message preview
//!
//! Responsibilities:
//! - Send, edit, delete and page through chat messages
//! - Lifecycle events on the event bus
//! - Read-repair of the chat preview and real-time delivery

pub mod actions;
pub mod effects;
pub mod error;
pub mod events;
pub mod models;

pub use error::MessageError;
pub use events::{MessageCreated, MessageEdited, MessageEvent, MessagesDeleted};
pub use models::{Message, NewMessage};
