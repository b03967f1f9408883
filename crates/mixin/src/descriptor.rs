//! Declarative mixin descriptors.
//!
//! A descriptor names the hooked target class and lists what must appear
//! on it. Bodies for copied methods come from the compiled mixin class
//! attached in [`MixinDescriptor::class`].

use grafter_core::{AccessFlags, ClassFile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A method declared by the mixin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDecl {
    pub name: String,
    pub desc: String,
    /// Overrides the per-kind default when no compiled class is attached.
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub is_abstract: Option<bool>,
}

impl MethodDecl {
    pub fn new(name: &str, desc: &str) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
            is_abstract: None,
        }
    }
}

/// A field added to the target, or a shadow of a hooked field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub access: AccessFlags,
    /// Field hook this mixin field stands for. Shadow fields are not added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow: Option<String>,
    /// Getter method name; empty means `get` + capitalised field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,
}

impl FieldSpec {
    pub const fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    pub fn getter_name(&self) -> Option<String> {
        self.getter.as_deref().map(|n| accessor_name("get", n, &self.name))
    }

    pub fn setter_name(&self) -> Option<String> {
        self.setter.as_deref().map(|n| accessor_name("set", n, &self.name))
    }
}

fn accessor_name(prefix: &str, explicit: &str, field: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

/// A getter, invocation shim or copy bound to a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookedMethod {
    pub hook: String,
    pub method: MethodDecl,
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetterSpec {
    pub hook: String,
    pub method: MethodDecl,
    #[serde(default)]
    pub is_static: bool,
    /// Encode with the inverse multiplier before storing.
    #[serde(default = "enabled")]
    pub encode: bool,
}

const fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Before,
    After,
}

/// A callback spliced into a hooked method, or into every constructor when
/// `hook` is `<init>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectSpec {
    pub hook: String,
    pub method: MethodDecl,
    pub placement: Placement,
    #[serde(default)]
    pub end: bool,
}

pub type AccessorSpec = HookedMethod;
pub type InvokeSpec = HookedMethod;
pub type CopySpec = HookedMethod;
pub type ReplaceSpec = HookedMethod;

/// Everything one mixin adds to one target class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixinDescriptor {
    /// Semantic name of the target class hook.
    pub target: String,
    #[serde(skip)]
    pub class: Option<Arc<ClassFile>>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub getters: Vec<AccessorSpec>,
    #[serde(default)]
    pub setters: Vec<SetterSpec>,
    #[serde(default)]
    pub invokes: Vec<InvokeSpec>,
    #[serde(default)]
    pub injects: Vec<InjectSpec>,
    #[serde(default)]
    pub copies: Vec<CopySpec>,
    #[serde(default)]
    pub replaces: Vec<ReplaceSpec>,
    /// Concrete methods copied verbatim.
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

impl MixinDescriptor {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Self::default()
        }
    }

    /// Attaches the compiled mixin class supplying method bodies.
    pub fn with_class(mut self, class: ClassFile) -> Self {
        self.class = Some(Arc::new(class));
        self
    }
}
