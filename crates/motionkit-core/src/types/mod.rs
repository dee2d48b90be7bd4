//! Shared type aliases

pub mod aliases;

pub use aliases::*;
