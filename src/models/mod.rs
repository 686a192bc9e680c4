//! Data models for the topic voting application.
//!
//! Response models serialize as JSON; request forms deserialize from
//! `application/x-www-form-urlencoded` bodies.

mod topic;
mod user;

pub use topic::*;
pub use user::*;
