//! Shared error types for the grafter workspace.

pub mod errors;
