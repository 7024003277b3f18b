// HTTP routes
pub mod health;
pub mod messages;
pub mod ws;

pub use health::*;
pub use messages::*;
pub use ws::*;
