//! Scan event logging: JSONL writer plus the channel-fed logger thread.

pub mod events;
pub mod jsonl;
