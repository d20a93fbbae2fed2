//! Foundation value types shared across the pipeline.

/// Core time and pixel vocabulary.
pub mod core;
