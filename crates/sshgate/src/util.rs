//! Utility types shared across the engine.

pub mod deadline;

pub use deadline::{Deadline, TimeoutExt};
