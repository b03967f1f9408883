//! Hook tables, mixin descriptors and the injector that applies them to a
//! batch of obfuscated classes.

pub mod config;
pub mod descriptor;
pub mod hooks;
pub mod injector;
pub mod math;
pub mod resolver;

pub use config::{EntryPointConfig, InjectConfig};
pub use descriptor::MixinDescriptor;
pub use hooks::HookTable;
pub use injector::{inject, InjectReport, Injector, Stage};
pub use resolver::MixinResolver;
