//! Core primitives.
//!
//! Nothing here knows about connections or sessions.

pub mod choice;
pub mod color;

// Re-export core types
pub use choice::{compare, Move, Outcome};
pub use color::Color;
