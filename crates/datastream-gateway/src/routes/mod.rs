//! HTTP route handlers.

pub mod capabilities;
pub mod health;
pub mod pull;
pub mod push;
pub mod subscribe;
