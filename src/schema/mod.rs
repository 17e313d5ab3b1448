//! Inbound record schema
//!
//! Typed daily records for the sensor and survey modalities, plus the adapter
//! that parses and groups them.

mod adapter;
mod records;

pub use adapter::*;
pub use records::*;
