use crate::{Adapter, AdapterContext, ClassBatch};
use grafter_core::hierarchy::ClassHeader;
use grafter_core::{decoder, ClassFile, ClassHierarchy, ClassPath};
use grafter_utils::errors::{AdapterError, InjectError};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one group pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    /// Classes whose bytes were replaced, in registration order.
    pub modified: Vec<String>,
    /// Registered classes (or copy sources) absent from the batch.
    pub missing: Vec<String>,
}

/// Adapter chains keyed by class name.
///
/// Chains run in registration order. Every chain of a pass sees the batch as
/// it was when the pass started; results are written back once all chains
/// finished.
#[derive(Debug, Default)]
pub struct AdapterGroup {
    name: &'static str,
    chains: IndexMap<String, Vec<Box<dyn Adapter>>>,
}

struct ChainOutcome {
    class: String,
    bytes: Option<Vec<u8>>,
    missing: Vec<String>,
}

impl AdapterGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            chains: IndexMap::new(),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Appends `adapter` to the chain of `class`.
    pub fn add_adapter(&mut self, class: &str, adapter: impl Adapter + 'static) {
        self.add_boxed(class, Box::new(adapter));
    }

    pub fn add_boxed(&mut self, class: &str, adapter: Box<dyn Adapter>) {
        self.chains.entry(class.to_string()).or_default().push(adapter);
    }

    pub fn chain(&self, class: &str) -> Option<&[Box<dyn Adapter>]> {
        self.chains.get(class).map(Vec::as_slice)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Runs every chain against `batch` and writes back modified classes.
    ///
    /// Classes that are registered but absent are logged and reported, not
    /// treated as errors. Any adapter failure aborts the pass before the
    /// batch is touched.
    pub fn apply(&self, batch: &mut ClassBatch, parallel: bool) -> Result<GroupReport, InjectError> {
        self.apply_with(batch, parallel, None)
    }

    /// Like [`AdapterGroup::apply`], resolving types outside the batch
    /// through `library` when frames are recomputed.
    pub fn apply_with(
        &self,
        batch: &mut ClassBatch,
        parallel: bool,
        library: Option<&Arc<ClassPath>>,
    ) -> Result<GroupReport, InjectError> {
        let mut hierarchy = Self::hierarchy(batch)?;
        if let Some(library) = library {
            hierarchy = hierarchy.with_library(Arc::clone(library));
        }
        let mut report = GroupReport::default();

        let mut work = Vec::with_capacity(self.chains.len());
        for (class, chain) in &self.chains {
            if batch.contains(class) {
                work.push((class.as_str(), chain.as_slice()));
            } else {
                warn!("{}: class {class} is not in the batch", self.name);
                report.missing.push(class.clone());
            }
        }

        let outcomes = {
            let ctx = AdapterContext::new(batch, &hierarchy);
            let run = |(class, chain): &(&str, &[Box<dyn Adapter>])| {
                Self::run_chain(class, chain, &ctx, &hierarchy)
            };
            if parallel {
                work.par_iter().map(run).collect::<Result<Vec<_>, _>>()?
            } else {
                work.iter().map(run).collect::<Result<Vec<_>, _>>()?
            }
        };

        for outcome in outcomes {
            report.missing.extend(outcome.missing);
            if let Some(bytes) = outcome.bytes {
                batch.insert(outcome.class.clone(), bytes);
                report.modified.push(outcome.class);
            }
        }
        info!(
            "{:>12} modified {} / missing {}",
            self.name,
            report.modified.len(),
            report.missing.len()
        );
        Ok(report)
    }

    fn hierarchy(batch: &ClassBatch) -> Result<ClassHierarchy, InjectError> {
        let mut hierarchy = ClassHierarchy::new();
        for (class, bytes) in batch.iter() {
            let header: ClassHeader =
                decoder::parse_header(bytes).map_err(|source| InjectError::Malformed {
                    class: class.to_string(),
                    source,
                })?;
            hierarchy.insert(header);
        }
        Ok(hierarchy)
    }

    fn run_chain(
        class: &str,
        chain: &[Box<dyn Adapter>],
        ctx: &AdapterContext<'_>,
        hierarchy: &ClassHierarchy,
    ) -> Result<ChainOutcome, InjectError> {
        let mut outcome = ChainOutcome {
            class: class.to_string(),
            bytes: None,
            missing: Vec::new(),
        };
        let Some(bytes) = ctx.bytes(class) else {
            return Ok(outcome);
        };
        let mut model = ClassFile::parse(bytes).map_err(|source| InjectError::Malformed {
            class: class.to_string(),
            source,
        })?;

        let mut modified = false;
        for adapter in chain {
            match adapter.apply(&mut model, ctx) {
                Ok(changed) => {
                    debug!("{} on {class}: changed={changed}", adapter.name());
                    modified |= changed;
                }
                Err(AdapterError::MissingSource(source)) => {
                    warn!("{} on {class}: source class {source} is not in the batch", adapter.name());
                    outcome.missing.push(source);
                }
                Err(source) => {
                    return Err(InjectError::Adapter {
                        class: class.to_string(),
                        adapter: adapter.name(),
                        source,
                    })
                }
            }
        }
        if modified {
            let bytes = model.to_bytes(hierarchy).map_err(|source| InjectError::Write {
                class: class.to_string(),
                source,
            })?;
            outcome.bytes = Some(bytes);
        }
        Ok(outcome)
    }
}
