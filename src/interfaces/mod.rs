//! Adapters between external formats and the engine.

pub mod csv;
