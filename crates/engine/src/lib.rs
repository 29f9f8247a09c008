//! Omnichannel conversation engine
//!
//! This crate merges inbound customer messages from heterogeneous channels
//! (business chat, social DMs, email, SMS) into durable conversation threads,
//! routes operator replies back out through the owning channel, and keeps a
//! unified inbox view consistent across live operator sessions.
//!
//! ## Core Concepts
//!
//! - **Conversation**: a thread between one customer and one organization on
//!   one channel, owning a lifecycle state machine
//!   (`pending -> active -> resolved -> closed`). At most one open
//!   conversation exists per (customer, channel) pair.
//!
//! - **ChannelMessage**: a single inbound or outbound message inside a
//!   conversation, totally ordered by timestamp.
//!
//! - **ChannelAdapter**: trait translating between a provider's wire payloads
//!   and the engine's generic inbound/outbound model. Adapters are registered
//!   in an [`logic::channel::AdapterRegistry`] constructed at startup.
//!
//! - **Gateway**: webhook ingestion pipeline (authenticate, normalize,
//!   deduplicate, hand to the conversation manager).
//!
//! - **Dispatcher**: outbound send path with persisted, bounded retry.
//!
//! - **EventBus**: best-effort broadcast of conversation changes to live
//!   operator sessions; the read API is always the reconciliation path.

pub mod dispatch;
pub mod gateway;
pub mod logic;
pub mod repository;
pub mod router;
pub mod service;

/// Schema migrations for the engine database, applied in order.
pub const MIGRATIONS: shared::libsql::Migrations = &[(
    "0001_conversation_engine.up.sql",
    include_str!("../migrations/0001_conversation_engine.up.sql"),
)];
