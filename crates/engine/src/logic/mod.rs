//! Domain models and business logic for the conversation engine.
//!
//! Logic functions are free functions over repository traits so tests can run
//! against an in-memory database without any HTTP plumbing.

pub mod channel;
pub mod conversation;
pub mod event;
pub mod inbox;
pub mod integration;
pub mod message;
