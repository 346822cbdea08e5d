//! # pb-core
//!
//! Shared vocabulary for protobridge: the status-style error taxonomy and the
//! LLM-facing types (tools, tool calls, JSON schemas, messages) that travel
//! between the schema bridge and a text-generation provider.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
