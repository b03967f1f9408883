use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the entry-point adaptation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPointConfig {
    /// Class hook naming the engine that receives applet-only calls.
    pub hook: String,
    pub legacy_superclass: String,
    pub component_superclass: String,
}

impl Default for EntryPointConfig {
    fn default() -> Self {
        Self {
            hook: "GameEngine".to_string(),
            legacy_superclass: "java/applet/Applet".to_string(),
            component_superclass: "java/awt/Panel".to_string(),
        }
    }
}

/// Configuration for an injection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InjectConfig {
    /// `None` leaves the entry-adaptation pass empty.
    pub entry_point: Option<EntryPointConfig>,
    /// Run the chains of one pass across classes on the rayon pool
    pub parallel: bool,
    /// Jars, jmods and class directories the batch links against. Their
    /// headers refine the types merged into recomputed stack map frames.
    pub classpath: Vec<PathBuf>,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            entry_point: Some(EntryPointConfig::default()),
            parallel: false,
            classpath: Vec::new(),
        }
    }
}

impl InjectConfig {
    /// No entry adaptation, for batches that are not applet clients.
    pub fn library() -> Self {
        Self {
            entry_point: None,
            ..Self::default()
        }
    }
}
