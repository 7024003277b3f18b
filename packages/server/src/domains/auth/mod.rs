//! Auth domain - bearer token verification
//!
//! Users and token issuance belong to the user service. This server only
//! verifies tokens and reads the caller's identity from them.

pub mod jwt;

pub use jwt::{Claims, JwtService};
