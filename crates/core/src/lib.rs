//! In-memory model of JVM class files: parsing, symbolic editing and
//! serialization with recomputed verification metadata.

pub mod access;
pub mod analysis;
pub mod bootstrap;
pub mod class_file;
pub mod classpath;
pub mod constant_pool;
pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod frames;
pub mod hierarchy;
pub mod instruction;
pub mod io;
mod mutf8;
pub mod opcode;
pub mod remap;

pub use access::AccessFlags;
pub use class_file::{Attribute, ClassFile, Code, Field, Handler, LocalVariable, Method};
pub use classpath::ClassPath;
pub use descriptor::{FieldType, MethodDescriptor};
pub use hierarchy::{ClassHierarchy, TypeHierarchy};
pub use instruction::{Bootstrap, Handle, Insn, Label, LdcValue};
pub use remap::Remapper;
