//! Library classes the batch links against but never rewrites.
//!
//! Only class headers are kept, which is all the hierarchy needs to merge
//! reference types that come from outside the batch.

use crate::decoder;
use crate::hierarchy::ClassHeader;
use grafter_utils::errors::ClassPathError;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const JMOD_MAGIC: &[u8] = b"JM\x01\x00";

#[derive(Debug, Clone, Default)]
pub struct ClassPath {
    headers: HashMap<String, ClassHeader>,
}

impl ClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every entry in order. Earlier entries win on duplicate names.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ClassPathError> {
        let mut classpath = Self::new();
        for path in paths {
            classpath.add_path(path.as_ref())?;
        }
        info!(
            "loaded {} library classes from {} classpath entries",
            classpath.len(),
            paths.len()
        );
        Ok(classpath)
    }

    /// Adds a `.class` file, a `.jar` or `.jmod` archive, or a directory
    /// holding any of those.
    pub fn add_path(&mut self, path: &Path) -> Result<(), ClassPathError> {
        let io_error = |source| ClassPathError::Io {
            path: path.to_path_buf(),
            source,
        };
        if path.is_dir() {
            let mut entries = fs::read_dir(path)
                .map_err(io_error)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(io_error)?;
            entries.sort();
            for entry in entries {
                if entry.is_dir() || has_extension(&entry, &["class", "jar", "jmod"]) {
                    self.add_path(&entry)?;
                }
            }
            return Ok(());
        }
        let data = fs::read(path).map_err(io_error)?;
        if has_extension(path, &["class"]) {
            let header = parse(path, &path.display().to_string(), &data)?;
            self.insert(header);
            return Ok(());
        }
        let archive = data.strip_prefix(JMOD_MAGIC).unwrap_or(&data);
        let added = self.add_archive(path, archive)?;
        debug!("{}: {added} classes", path.display());
        Ok(())
    }

    fn add_archive(&mut self, path: &Path, data: &[u8]) -> Result<usize, ClassPathError> {
        let io_error = |source| ClassPathError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut archive = zip::ZipArchive::new(Cursor::new(data))
            .map_err(|e| io_error(io::Error::other(e)))?;
        let mut added = 0;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| io_error(io::Error::other(e)))?;
            let name = entry.name().to_string();
            if entry.is_dir()
                || !name.ends_with(".class")
                || name.starts_with("META-INF/")
                || name.ends_with("module-info.class")
            {
                continue;
            }
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes).map_err(io_error)?;
            self.insert(parse(path, &name, &bytes)?);
            added += 1;
        }
        Ok(added)
    }

    /// Adds one header unless a class of that name is already present.
    pub fn insert(&mut self, header: ClassHeader) {
        self.headers.entry(header.name.clone()).or_insert(header);
    }

    pub fn get(&self, name: &str) -> Option<&ClassHeader> {
        self.headers.get(name)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e))
}

fn parse(path: &Path, entry: &str, bytes: &[u8]) -> Result<ClassHeader, ClassPathError> {
    decoder::parse_header(bytes).map_err(|source| ClassPathError::Malformed {
        path: PathBuf::from(path),
        entry: entry.to_string(),
        source,
    })
}
