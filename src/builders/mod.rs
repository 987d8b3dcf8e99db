//! Builders that assemble a coordination context from configuration.

pub mod context_builder;

pub use context_builder::{build_context, build_context_with};
#[cfg(feature = "postgres")]
pub use context_builder::connect_context;
