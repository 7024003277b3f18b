// Common types and utilities shared across the application

pub mod entity_ids;
pub mod pagination;

pub use entity_ids::*;
pub use pagination::{MessageCursor, MAX_PAGE_SIZE};
