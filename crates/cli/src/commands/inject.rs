use async_trait::async_trait;
use clap::Args;
use grafter_core::decoder::parse_header;
use grafter_core::ClassFile;
use grafter_mixin::{HookTable, InjectConfig, InjectReport, Injector, MixinDescriptor};
use grafter_transform::ClassBatch;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Arguments for the `inject` subcommand.
#[derive(Args)]
pub struct InjectArgs {
    /// Hook table (JSON)
    #[arg(long)]
    pub hooks: PathBuf,
    /// Mixin descriptor (JSON), may be repeated
    #[arg(long = "mixin")]
    pub mixins: Vec<PathBuf>,
    /// Directory of class files to rewrite
    #[arg(long)]
    pub input: PathBuf,
    /// Directory receiving the rewritten classes
    #[arg(long)]
    pub output: PathBuf,
    /// Skip the applet entry-point pass
    #[arg(long)]
    pub no_entry_point: bool,
    /// Apply each pass across classes in parallel
    #[arg(long)]
    pub parallel: bool,
    /// Library jar, jmod or class directory, may be repeated
    #[arg(long = "classpath")]
    pub classpath: Vec<PathBuf>,
    /// Add the JDK's runtime modules to the classpath
    #[arg(long)]
    pub jdk: bool,
    /// JDK used by --jdk instead of $JAVA_HOME
    #[arg(long, requires = "jdk")]
    pub java_home: Option<PathBuf>,
}

/// A mixin descriptor on disk, optionally naming its compiled class.
///
/// A relative `class` path is resolved against the descriptor's directory.
#[derive(Debug, Deserialize)]
pub struct MixinFile {
    #[serde(default)]
    pub class: Option<PathBuf>,
    #[serde(flatten)]
    pub descriptor: MixinDescriptor,
}

/// Class files read from a directory, keyed by internal name, with the
/// relative path each one came from.
#[derive(Debug, Default)]
pub struct ClassTree {
    pub batch: ClassBatch,
    pub paths: HashMap<String, PathBuf>,
    /// Non-class files, copied through unchanged.
    pub resources: Vec<PathBuf>,
}

#[async_trait]
impl super::Command for InjectArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let report = run(&self)?;
        for (stage, class) in report.missing() {
            println!("missing  {stage:<12} {class}");
        }
        println!("modified {} classes", report.modified().len());
        Ok(())
    }
}

/// Runs an injection from files to files.
pub fn run(args: &InjectArgs) -> Result<InjectReport, Box<dyn Error>> {
    let hooks = load_hooks(&args.hooks)?;
    let config = InjectConfig {
        entry_point: if args.no_entry_point {
            None
        } else {
            InjectConfig::default().entry_point
        },
        parallel: args.parallel,
        classpath: classpath(args)?,
    };

    let mut injector = Injector::new(hooks, config);
    for path in &args.mixins {
        let mixin = load_mixin(path)?;
        injector
            .add_mixin(&mixin)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        debug!("registered mixin {} from {}", mixin.target, path.display());
    }

    let mut tree = read_tree(&args.input)?;
    info!("read {} classes from {}", tree.batch.len(), args.input.display());
    let report = injector.inject(&mut tree.batch)?;
    write_tree(&args.input, &args.output, &tree)?;
    Ok(report)
}

/// Explicit classpath entries followed by the JDK's `jmods` directory.
fn classpath(args: &InjectArgs) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut entries = args.classpath.clone();
    if !args.jdk {
        return Ok(entries);
    }
    let home = match &args.java_home {
        Some(home) => home.clone(),
        None => std::env::var_os("JAVA_HOME")
            .map(PathBuf::from)
            .ok_or("--jdk needs --java-home or JAVA_HOME")?,
    };
    let jmods = home.join("jmods");
    if !jmods.is_dir() {
        return Err(format!("{}: no jmods directory", home.display()).into());
    }
    debug!("using JDK modules from {}", jmods.display());
    entries.push(jmods);
    Ok(entries)
}

pub fn load_hooks(path: &Path) -> Result<HookTable, Box<dyn Error>> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let hooks = serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(hooks)
}

pub fn load_mixin(path: &Path) -> Result<MixinDescriptor, Box<dyn Error>> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let file: MixinFile =
        serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?;
    let Some(class) = file.class else {
        return Ok(file.descriptor);
    };
    let class = match path.parent() {
        Some(dir) if class.is_relative() => dir.join(class),
        _ => class,
    };
    let bytes = fs::read(&class).map_err(|e| format!("{}: {e}", class.display()))?;
    let parsed = ClassFile::parse(&bytes).map_err(|e| format!("{}: {e}", class.display()))?;
    Ok(file.descriptor.with_class(parsed))
}

/// Reads every file under `root`. Class files are keyed by the internal name
/// in their header, not by their path.
pub fn read_tree(root: &Path) -> Result<ClassTree, Box<dyn Error>> {
    let mut tree = ClassTree::default();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .map_err(|e| format!("{}: {e}", dir.display()))?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path.strip_prefix(root)?.to_path_buf();
            if path.extension().is_some_and(|ext| ext == "class") {
                let bytes = fs::read(&path)?;
                let header =
                    parse_header(&bytes).map_err(|e| format!("{}: {e}", path.display()))?;
                if tree.batch.contains(&header.name) {
                    warn!("duplicate class {} at {}", header.name, path.display());
                }
                tree.paths.insert(header.name.clone(), relative);
                tree.batch.insert(&header.name, bytes);
            } else {
                tree.resources.push(relative);
            }
        }
    }
    Ok(tree)
}

/// Writes `tree` below `output`, mirroring the layout read from `input`.
pub fn write_tree(input: &Path, output: &Path, tree: &ClassTree) -> Result<(), Box<dyn Error>> {
    for (name, bytes) in tree.batch.iter() {
        let relative = tree
            .paths
            .get(name)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(format!("{name}.class")));
        write_file(&output.join(relative), bytes)?;
    }
    for relative in &tree.resources {
        let bytes = fs::read(input.join(relative))?;
        write_file(&output.join(relative), &bytes)?;
    }
    info!("wrote {} classes to {}", tree.batch.len(), output.display());
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(())
}
