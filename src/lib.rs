//! Coach Relay — moderation and delayed-response engine for coaching chat.

pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod policy;
pub mod profile;
pub mod store;
