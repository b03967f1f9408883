use crate::{Adapter, AdapterContext};
use grafter_core::{AccessFlags, ClassFile, Field};
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// Declares a new field. A field of the same name and type is left alone;
/// one of a different type is an error.
#[derive(Debug, Clone)]
pub struct AddField {
    access: AccessFlags,
    name: String,
    desc: String,
}

impl AddField {
    pub fn new(access: AccessFlags, name: &str, desc: &str) -> Self {
        Self {
            access,
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }
}

impl Adapter for AddField {
    fn name(&self) -> &'static str {
        "AddField"
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        let added = class.add_field(Field::new(self.access, &self.name, &self.desc))?;
        if added {
            debug!("added field {}.{} {}", class.name, self.name, self.desc);
        }
        Ok(added)
    }
}
