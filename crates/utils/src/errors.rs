use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for class file decoding.
///
/// Raised when the bytes of a class do not describe a well-formed class file.
#[derive(Debug, Error)]
pub enum ClassFormatError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),
    #[error("bad magic number 0x{0:08x}")]
    BadMagic(u32),
    #[error("invalid constant pool index {0}")]
    InvalidIndex(u16),
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { index: u16, tag: u8 },
    #[error("constant {index} is not a {expected}")]
    WrongConstant { index: u16, expected: &'static str },
    #[error("invalid modified UTF-8 in constant {0}")]
    InvalidUtf8(u16),
    #[error("unknown opcode 0x{opcode:02x} at pc {pc}")]
    UnknownOpcode { pc: usize, opcode: u8 },
    #[error("branch at pc {pc} targets {target}, outside the code array")]
    InvalidBranch { pc: usize, target: i64 },
    #[error("malformed descriptor `{0}`")]
    BadDescriptor(String),
    #[error("malformed {attribute} attribute: {msg}")]
    BadAttribute { attribute: &'static str, msg: String },
}

/// Error type for class file serialization.
///
/// Any of these means an edited class model broke a structural invariant; the
/// artifact is never emitted.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("label L{0} is referenced but never placed")]
    UnboundLabel(u32),
    #[error("branch offset {0} does not fit in 16 bits")]
    BranchOutOfRange(i64),
    #[error("constant pool exceeds 65535 entries")]
    PoolOverflow,
    #[error("code of {method} is {len} bytes, limit is 65535")]
    CodeTooLarge { method: String, len: usize },
    #[error("stack underflow in {method} at instruction {index}")]
    StackUnderflow { method: String, index: usize },
    #[error("inconsistent stack height in {method} at instruction {index}")]
    InconsistentStack { method: String, index: usize },
    #[error("{method}: {msg}")]
    Verify { method: String, msg: String },
    #[error("format error: {0}")]
    Format(#[from] ClassFormatError),
}

/// Error type for loading library classes from a classpath.
#[derive(Debug, Error)]
pub enum ClassPathError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: entry {entry} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        entry: String,
        #[source]
        source: ClassFormatError,
    },
}

/// Error type for a single bytecode adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("method {owner}.{name}{desc} not found")]
    MissingMethod {
        owner: String,
        name: String,
        desc: String,
    },
    #[error("field {owner}.{name} already exists as {existing}, cannot add it as {expected}")]
    FieldConflict {
        owner: String,
        name: String,
        existing: String,
        expected: String,
    },
    #[error("descriptor mismatch in {context}: {msg}")]
    DescriptorMismatch { context: String, msg: String },
    #[error("source class {0} is not part of the batch")]
    MissingSource(String),
    #[error("format error: {0}")]
    Format(#[from] ClassFormatError),
    #[error("write error: {0}")]
    Write(#[from] WriteError),
}

/// Error type for mixin resolution.
///
/// Every variant is a configuration bug in either the hook table or a mixin
/// descriptor and aborts the injection before any class is touched.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no class hook found for {0}")]
    MissingClassHook(String),
    #[error("no field hook found for {class}.{field}")]
    MissingFieldHook { class: String, field: String },
    #[error("no static field hook found for {0}")]
    MissingStaticFieldHook(String),
    #[error("no method hook found for {class}.{method}")]
    MissingMethodHook { class: String, method: String },
    #[error("no static method hook found for {0}")]
    MissingStaticMethodHook(String),
    #[error("{kind} method {mixin}.{method} must be abstract")]
    NotAbstract {
        kind: &'static str,
        mixin: String,
        method: String,
    },
    #[error("{kind} method {mixin}.{method} must have a body")]
    NotConcrete {
        kind: &'static str,
        mixin: String,
        method: String,
    },
    #[error("multiplier {multiplier} on {field} needs an int or long field, found {desc}")]
    MultiplierType {
        field: String,
        desc: String,
        multiplier: i64,
    },
    #[error("multiplier {multiplier} on {field} is even and has no inverse")]
    EvenMultiplier { field: String, multiplier: i64 },
    #[error("{0} is not supported")]
    Unsupported(String),
    #[error("mixin {0} has no compiled class attached")]
    MissingMixinClass(String),
    #[error("mixin class {class} has no method {name}{desc}")]
    MissingMixinMethod {
        class: String,
        name: String,
        desc: String,
    },
    #[error("{context}: {msg}")]
    DescriptorMismatch { context: String, msg: String },
    #[error("format error: {0}")]
    Format(#[from] ClassFormatError),
}

/// Errors that can occur during injection.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("classpath: {0}")]
    ClassPath(#[from] ClassPathError),
    #[error("class {class} is malformed: {source}")]
    Malformed {
        class: String,
        #[source]
        source: ClassFormatError,
    },
    #[error("adapter {adapter} failed on {class}: {source}")]
    Adapter {
        class: String,
        adapter: &'static str,
        #[source]
        source: AdapterError,
    },
    #[error("could not serialize {class}: {source}")]
    Write {
        class: String,
        #[source]
        source: WriteError,
    },
}
