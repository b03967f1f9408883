//! Command implementations for the `grafter` binary.

pub mod commands;
