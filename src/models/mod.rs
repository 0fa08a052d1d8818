//! Core data models for the snippet delivery service.
//!
//! These entities describe targeted content items, their rendering templates,
//! the requesting client, and cached bundle artifacts. They map to database
//! rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod bundle;
pub mod client;
pub mod snippet;
pub mod template;
