//! Drives a batch of classes through the four adapter passes.

use crate::config::InjectConfig;
use crate::descriptor::MixinDescriptor;
use crate::hooks::HookTable;
use crate::resolver::MixinResolver;
use grafter_transform::adapters::AppletToPanel;
use grafter_core::ClassPath;
use grafter_transform::{AdapterGroup, ClassBatch, GroupReport};
use grafter_utils::errors::{InjectError, ResolveError};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// The passes, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Applet entry point to embeddable component.
    EntryPoint,
    /// New interfaces, fields, accessors, shims, callbacks and copied methods.
    PreCopy,
    /// Method bodies copied between classes.
    Copy,
    /// Hooked bodies replaced last so they win.
    PostCopy,
}

impl Stage {
    pub const ALL: [Self; 4] = [Self::EntryPoint, Self::PreCopy, Self::Copy, Self::PostCopy];

    pub const fn name(self) -> &'static str {
        match self {
            Self::EntryPoint => "entry-point",
            Self::PreCopy => "pre-copy",
            Self::Copy => "copy",
            Self::PostCopy => "post-copy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub stage: Stage,
    pub report: GroupReport,
}

/// What a whole injection did, one entry per pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectReport {
    pub passes: Vec<PassReport>,
}

impl InjectReport {
    pub fn pass(&self, stage: Stage) -> Option<&GroupReport> {
        self.passes
            .iter()
            .find(|p| p.stage == stage)
            .map(|p| &p.report)
    }

    /// Every class rewritten by at least one pass, without duplicates.
    pub fn modified(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for name in self.passes.iter().flat_map(|p| &p.report.modified) {
            if !out.contains(&name.as_str()) {
                out.push(name);
            }
        }
        out
    }

    pub fn missing(&self) -> impl Iterator<Item = (Stage, &str)> {
        self.passes
            .iter()
            .flat_map(|p| p.report.missing.iter().map(move |m| (p.stage, m.as_str())))
    }
}

/// Owns the hook table and the three resolver-populated groups.
///
/// Mixins are resolved as they are added, so a configuration error surfaces
/// before any class is touched. The entry-point group depends on the batch
/// and is built when [`Injector::inject`] runs.
#[derive(Debug)]
pub struct Injector {
    hooks: HookTable,
    config: InjectConfig,
    pre_copy: AdapterGroup,
    copy: AdapterGroup,
    post_copy: AdapterGroup,
}

impl Injector {
    pub fn new(hooks: HookTable, config: InjectConfig) -> Self {
        Self {
            hooks,
            config,
            pre_copy: AdapterGroup::new(Stage::PreCopy.name()),
            copy: AdapterGroup::new(Stage::Copy.name()),
            post_copy: AdapterGroup::new(Stage::PostCopy.name()),
        }
    }

    pub const fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub const fn config(&self) -> &InjectConfig {
        &self.config
    }

    /// Resolves `mixin` and registers its adapters.
    pub fn add_mixin(&mut self, mixin: &MixinDescriptor) -> Result<(), ResolveError> {
        let registrations = MixinResolver::new(&self.hooks).resolve(mixin)?;
        for registration in registrations {
            let group = match registration.stage {
                Stage::PreCopy => &mut self.pre_copy,
                Stage::Copy => &mut self.copy,
                Stage::PostCopy => &mut self.post_copy,
                Stage::EntryPoint => {
                    return Err(ResolveError::Unsupported(
                        "mixin adapters in the entry-point pass".to_string(),
                    ))
                }
            };
            group.add_boxed(&registration.class, registration.adapter);
        }
        Ok(())
    }

    /// Runs all four passes over `batch` in order. The passes work on a copy
    /// that replaces `batch` only once every pass has succeeded.
    pub fn inject(&self, batch: &mut ClassBatch) -> Result<InjectReport, InjectError> {
        let entry_point = self.entry_point(batch)?;
        let library = self.library()?;
        let mut work = batch.clone();
        let mut report = InjectReport::default();
        let groups = [
            (Stage::EntryPoint, &entry_point),
            (Stage::PreCopy, &self.pre_copy),
            (Stage::Copy, &self.copy),
            (Stage::PostCopy, &self.post_copy),
        ];
        for (stage, group) in groups {
            let pass = group.apply_with(&mut work, self.config.parallel, library.as_ref())?;
            report.passes.push(PassReport {
                stage,
                report: pass,
            });
        }
        *batch = work;
        info!(
            "injected {} classes ({} modified)",
            batch.len(),
            report.modified().len()
        );
        Ok(report)
    }

    fn library(&self) -> Result<Option<Arc<ClassPath>>, InjectError> {
        if self.config.classpath.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(ClassPath::load(&self.config.classpath)?)))
    }

    fn entry_point(&self, batch: &ClassBatch) -> Result<AdapterGroup, ResolveError> {
        let mut group = AdapterGroup::new(Stage::EntryPoint.name());
        let Some(config) = &self.config.entry_point else {
            return Ok(group);
        };
        let engine = &self.hooks.class_hook(&config.hook)?.obf_name;
        for class in batch.names() {
            group.add_adapter(
                class,
                AppletToPanel::new(
                    &config.legacy_superclass,
                    &config.component_superclass,
                    engine,
                ),
            );
        }
        Ok(group)
    }
}

/// Resolves every mixin and injects them into `batch` in one call.
pub fn inject(
    hooks: HookTable,
    mixins: &[MixinDescriptor],
    batch: &mut ClassBatch,
    config: InjectConfig,
) -> Result<InjectReport, InjectError> {
    let mut injector = Injector::new(hooks, config);
    for mixin in mixins {
        injector.add_mixin(mixin)?;
    }
    injector.inject(batch)
}
