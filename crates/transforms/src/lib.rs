//! Class-level bytecode adapters and the ordered groups that apply them to a
//! batch of classes.

pub mod adapters;
pub mod batch;
pub mod group;
pub mod util;

pub use batch::ClassBatch;
pub use group::{AdapterGroup, GroupReport};

use grafter_core::{ClassFile, ClassHierarchy};
use grafter_utils::errors::{AdapterError, ClassFormatError};
use std::fmt;

/// Trait for class rewrites.
pub trait Adapter: Send + Sync + fmt::Debug {
    /// Returns the adapter's name for logging and error reports.
    fn name(&self) -> &'static str;
    /// Applies the adapter to one class, returning whether it changed.
    fn apply(&self, class: &mut ClassFile, ctx: &AdapterContext<'_>) -> Result<bool, AdapterError>;
}

/// Read-only view of the batch as it was when the current group started.
#[derive(Debug, Clone, Copy)]
pub struct AdapterContext<'a> {
    batch: &'a ClassBatch,
    hierarchy: &'a ClassHierarchy,
}

impl<'a> AdapterContext<'a> {
    pub const fn new(batch: &'a ClassBatch, hierarchy: &'a ClassHierarchy) -> Self {
        Self { batch, hierarchy }
    }

    pub fn bytes(&self, name: &str) -> Option<&'a [u8]> {
        self.batch.get(name)
    }

    /// Parses `name` from the snapshot. `Ok(None)` if the batch lacks it.
    pub fn class(&self, name: &str) -> Result<Option<ClassFile>, ClassFormatError> {
        self.batch.get(name).map(ClassFile::parse).transpose()
    }

    pub const fn hierarchy(&self) -> &'a ClassHierarchy {
        self.hierarchy
    }
}

/// A field or method reference with owned names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl MemberRef {
    pub fn new(owner: &str, name: &str, desc: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.desc)
    }
}
