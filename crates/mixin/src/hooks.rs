//! Hook table: semantic names to obfuscated identifiers.

use grafter_utils::errors::ResolveError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A field binding. For class-scoped fields `owner` is the obfuscated class
/// name and is filled in when the table is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldHook {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    pub obf_name: String,
    pub desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<i64>,
}

/// A method binding. `dummy_value` is the constant an obfuscated method
/// expects as its trailing argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodHook {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    pub obf_name: String,
    pub desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dummy_value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassHook {
    pub name: String,
    pub obf_name: String,
    #[serde(default)]
    pub fields: Vec<FieldHook>,
    #[serde(default)]
    pub methods: Vec<MethodHook>,
}

/// The on-disk shape of a hook table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookFile {
    #[serde(default)]
    pub classes: Vec<ClassHook>,
    #[serde(default)]
    pub static_fields: Vec<FieldHook>,
    #[serde(default)]
    pub static_methods: Vec<MethodHook>,
}

#[derive(Debug, Clone)]
struct ClassEntry {
    hook: ClassHook,
    fields: HashMap<String, usize>,
    methods: HashMap<String, usize>,
}

/// Immutable lookup structure built from a [`HookFile`].
///
/// Every lookup failure is a configuration error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HookFile")]
pub struct HookTable {
    classes: HashMap<String, ClassEntry>,
    static_fields: HashMap<String, FieldHook>,
    static_methods: HashMap<String, MethodHook>,
}

impl From<HookFile> for HookTable {
    fn from(file: HookFile) -> Self {
        let classes = file
            .classes
            .into_iter()
            .map(|mut hook| {
                for field in &mut hook.fields {
                    field.owner.clone_from(&hook.obf_name);
                }
                for method in &mut hook.methods {
                    method.owner.clone_from(&hook.obf_name);
                }
                let fields = hook
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (f.name.clone(), i))
                    .collect();
                let methods = hook
                    .methods
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (m.name.clone(), i))
                    .collect();
                (
                    hook.name.clone(),
                    ClassEntry {
                        hook,
                        fields,
                        methods,
                    },
                )
            })
            .collect();
        Self {
            classes,
            static_fields: file
                .static_fields
                .into_iter()
                .map(|f| (f.name.clone(), f))
                .collect(),
            static_methods: file
                .static_methods
                .into_iter()
                .map(|m| (m.name.clone(), m))
                .collect(),
        }
    }
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, class: &str) -> Result<&ClassEntry, ResolveError> {
        self.classes
            .get(class)
            .ok_or_else(|| ResolveError::MissingClassHook(class.to_string()))
    }

    pub fn class_hook(&self, name: &str) -> Result<&ClassHook, ResolveError> {
        self.entry(name).map(|e| &e.hook)
    }

    pub fn field(&self, class: &str, name: &str) -> Result<&FieldHook, ResolveError> {
        let entry = self.entry(class)?;
        entry
            .fields
            .get(name)
            .map(|&i| &entry.hook.fields[i])
            .ok_or_else(|| ResolveError::MissingFieldHook {
                class: class.to_string(),
                field: name.to_string(),
            })
    }

    pub fn method(&self, class: &str, name: &str) -> Result<&MethodHook, ResolveError> {
        let entry = self.entry(class)?;
        entry
            .methods
            .get(name)
            .map(|&i| &entry.hook.methods[i])
            .ok_or_else(|| ResolveError::MissingMethodHook {
                class: class.to_string(),
                method: name.to_string(),
            })
    }

    pub fn static_field(&self, name: &str) -> Result<&FieldHook, ResolveError> {
        self.static_fields
            .get(name)
            .ok_or_else(|| ResolveError::MissingStaticFieldHook(name.to_string()))
    }

    pub fn static_method(&self, name: &str) -> Result<&MethodHook, ResolveError> {
        self.static_methods
            .get(name)
            .ok_or_else(|| ResolveError::MissingStaticMethodHook(name.to_string()))
    }

    /// Class hooks sorted by semantic name.
    pub fn classes(&self) -> Vec<&ClassHook> {
        let mut hooks: Vec<_> = self.classes.values().map(|e| &e.hook).collect();
        hooks.sort_by(|a, b| a.name.cmp(&b.name));
        hooks
    }

    pub fn static_field_count(&self) -> usize {
        self.static_fields.len()
    }

    pub fn static_method_count(&self) -> usize {
        self.static_methods.len()
    }
}
