//! Sotto core — shared types, message bus, session store, and configuration.
//!
//! This crate holds everything the orchestration engine and its adapters
//! agree on:
//! - **types**: chat messages in the LM wire format, tool calls, responses
//! - **bus**: bounded inbound/outbound queues connecting adapters ↔ engine
//! - **session**: per-conversation history with JSONL persistence and
//!   layered compaction
//! - **config**: typed configuration schema and loader
//! - **restart**: consume-once restart signal for post-restart verification

pub mod bus;
pub mod config;
pub mod restart;
pub mod session;
pub mod types;
pub mod utils;
