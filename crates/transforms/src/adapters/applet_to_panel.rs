use crate::{Adapter, AdapterContext};
use grafter_core::{ClassFile, Insn, Remapper};
use grafter_utils::errors::AdapterError;
use std::collections::BTreeSet;
use tracing::debug;

/// Members of the applet class with no counterpart on the panel class.
const APPLET_ONLY: &[&str] = &[
    "getAppletContext",
    "getAppletInfo",
    "getAudioClip",
    "getCodeBase",
    "getDocumentBase",
    "getImage",
    "getParameter",
    "getParameterInfo",
    "isActive",
    "play",
    "setStub",
    "showStatus",
];

/// Turns an applet-based client into a plain component that can be
/// embedded in another window.
///
/// References to the legacy applet class become references to the
/// component class. Calls to applet-only members are redirected to the
/// game engine class, where a mixin can supply them.
#[derive(Debug, Clone)]
pub struct AppletToPanel {
    legacy: String,
    component: String,
    engine: String,
}

impl AppletToPanel {
    pub fn new(legacy: &str, component: &str, engine: &str) -> Self {
        Self {
            legacy: legacy.to_string(),
            component: component.to_string(),
            engine: engine.to_string(),
        }
    }

    fn remapper(&self, class: &ClassFile, ctx: &AdapterContext<'_>) -> Remapper {
        let mut remapper = Remapper::new();
        remapper.map_class(&self.legacy, &self.component);
        let redirected: BTreeSet<(&str, &str)> = class
            .methods
            .iter()
            .filter_map(|m| m.code.as_ref())
            .flat_map(|code| code.insns.iter())
            .filter_map(|insn| match insn {
                Insn::Method { owner, name, .. } if APPLET_ONLY.contains(&name.as_str()) => {
                    Some((owner.as_str(), name.as_str()))
                }
                _ => None,
            })
            .filter(|(owner, _)| {
                *owner == self.legacy || ctx.hierarchy().is_assignable(&self.legacy, owner)
            })
            .collect();
        for (owner, name) in redirected {
            remapper.map_method_owner(owner, name, &self.engine);
        }
        remapper
    }
}

impl Adapter for AppletToPanel {
    fn name(&self) -> &'static str {
        "AppletToPanel"
    }

    fn apply(&self, class: &mut ClassFile, ctx: &AdapterContext<'_>) -> Result<bool, AdapterError> {
        let extends_legacy = class.super_name.as_deref() == Some(self.legacy.as_str());
        if !extends_legacy && !class.pool.mentions(&self.legacy) {
            return Ok(false);
        }
        let remapper = self.remapper(class, ctx);

        let mut adapted = class.clone();
        adapted.super_name = class.super_name.as_deref().map(|s| remapper.class(s));
        for interface in &mut adapted.interfaces {
            *interface = remapper.class(interface);
        }
        for field in &mut adapted.fields {
            field.desc = remapper.desc(&field.desc);
        }
        for method in &mut adapted.methods {
            method.desc = remapper.desc(&method.desc);
            if let Some(code) = &method.code {
                method.code = Some(remapper.code(code));
            }
        }
        if adapted == *class {
            return Ok(false);
        }
        debug!(
            "{} adapted from {} to {}",
            class.name, self.legacy, self.component
        );
        *class = adapted;
        Ok(true)
    }
}
