// Chat Server - Message Pipeline Core
//
// This crate provides the message lifecycle and real-time delivery pipeline:
// membership-checked message mutations, the event bus that keeps the chat
// last-message cache consistent, and the WebSocket connection hub.
//
// Business logic lives per-domain in domains/*, infrastructure in kernel/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
