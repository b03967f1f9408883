//! End-to-end tests for the injector, plus the fixtures and interpreter
//! they share.

pub mod fixtures;
pub mod vm;

#[cfg(test)]
mod cli;
#[cfg(test)]
mod class_model;
#[cfg(test)]
mod mixin;
#[cfg(test)]
mod transforms;
