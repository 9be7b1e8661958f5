//! Comms Triage: multi-source message ingestion and rule-based prioritization.

pub mod config;
pub mod error;
pub mod feeds;
pub mod pipeline;
pub mod store;
