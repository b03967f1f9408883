use crate::{Adapter, AdapterContext, MemberRef};
use grafter_core::{AccessFlags, ClassFile, Remapper};
use grafter_utils::errors::AdapterError;
use tracing::debug;

/// Copies a hooked method from its owner into the class under a new name,
/// keeping the hooked descriptor. Recursive calls follow the copy.
#[derive(Debug, Clone)]
pub struct CopyMethod {
    source: MemberRef,
    name: String,
}

impl CopyMethod {
    pub fn new(source: MemberRef, name: &str) -> Self {
        Self {
            source,
            name: name.to_string(),
        }
    }

    pub const fn source(&self) -> &MemberRef {
        &self.source
    }
}

impl Adapter for CopyMethod {
    fn name(&self) -> &'static str {
        "CopyMethod"
    }

    fn apply(&self, class: &mut ClassFile, ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        if class.method(&self.name, &self.source.desc).is_some() {
            return Ok(false);
        }
        let snapshot;
        let owner = if self.source.owner == class.name {
            &*class
        } else {
            snapshot = ctx
                .class(&self.source.owner)?
                .ok_or_else(|| AdapterError::MissingSource(self.source.owner.clone()))?;
            &snapshot
        };
        let method = owner
            .method(&self.source.name, &self.source.desc)
            .ok_or_else(|| AdapterError::MissingMethod {
                owner: self.source.owner.clone(),
                name: self.source.name.clone(),
                desc: self.source.desc.clone(),
            })?;

        let mut remapper = Remapper::new();
        remapper.map_method(
            &self.source.owner,
            &self.source.name,
            &self.source.desc,
            &class.name,
            &self.name,
        );
        let mut copy = remapper.transplant(method);
        copy.name.clone_from(&self.name);
        copy.access.remove(AccessFlags::PRIVATE | AccessFlags::PROTECTED);
        copy.access.insert(AccessFlags::PUBLIC);

        debug!("copied {} to {}.{}", self.source, class.name, self.name);
        Ok(class.add_method(copy))
    }
}
