//! Chats domain - chat membership and the denormalized last-message cache.
//!
//! Chat creation and membership management live in a separate service; this
//! domain only reads membership and lets the reconciliation consumer refresh
//! the last-message preview.

pub mod models;

pub use models::*;
