use crate::{Adapter, AdapterContext};
use grafter_core::ClassFile;
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// Appends an interface to the class's interface list.
#[derive(Debug, Clone)]
pub struct AddInterface {
    interface: String,
}

impl AddInterface {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
        }
    }
}

impl Adapter for AddInterface {
    fn name(&self) -> &'static str {
        "AddInterface"
    }

    fn apply(&self, class: &mut ClassFile, _ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        let added = class.add_interface(&self.interface);
        if added {
            debug!("{} now implements {}", class.name, self.interface);
        }
        Ok(added)
    }
}
