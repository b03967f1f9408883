//! Type-hierarchy oracle used when merging reference types during frame
//! recomputation.

use crate::classpath::ClassPath;
use crate::decoder;
use grafter_utils::errors::ClassFormatError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub const OBJECT: &str = "java/lang/Object";

/// Answers "common supertype" queries for frame computation.
pub trait TypeHierarchy: Send + Sync {
    /// Most specific class both `a` and `b` are assignable to. Falls back to
    /// `java/lang/Object` for interfaces and unknown classes.
    fn common_supertype(&self, a: &str, b: &str) -> String;

    /// True if a value of type `from` can be stored where `to` is expected.
    /// Unknown classes are only assignable to themselves and `java/lang/Object`.
    fn is_assignable(&self, to: &str, from: &str) -> bool;
}

/// The parts of a class header the hierarchy is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
}

/// Superclass and interface edges of one batch of classes, optionally
/// backed by library classes the batch links against.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    classes: HashMap<String, ClassHeader>,
    library: Option<Arc<ClassPath>>,
}

impl ClassHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the hierarchy from raw class files.
    pub fn from_classes<'a>(
        classes: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<Self, ClassFormatError> {
        let mut hierarchy = Self::new();
        for bytes in classes {
            hierarchy.insert(decoder::parse_header(bytes)?);
        }
        Ok(hierarchy)
    }

    /// Falls back to `library` for classes outside the batch.
    pub fn with_library(mut self, library: Arc<ClassPath>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn insert(&mut self, header: ClassHeader) {
        self.classes.insert(header.name.clone(), header);
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn header(&self, name: &str) -> Option<&ClassHeader> {
        self.classes
            .get(name)
            .or_else(|| self.library.as_deref()?.get(name))
    }

    pub fn is_interface(&self, name: &str) -> bool {
        self.header(name).is_some_and(|c| c.is_interface)
    }

    fn super_of(&self, name: &str) -> Option<&str> {
        match self.header(name) {
            Some(header) => header.super_name.as_deref(),
            None if name == OBJECT => None,
            None => Some(OBJECT),
        }
    }

    /// True if a value of type `from` can be stored where `to` is expected.
    pub fn is_assignable(&self, to: &str, from: &str) -> bool {
        if to == from || to == OBJECT {
            return true;
        }
        match (to.strip_prefix('['), from.strip_prefix('[')) {
            (Some(to), Some(from)) => return self.is_element_assignable(to, from),
            (None, Some(_)) => {
                return matches!(to, "java/lang/Cloneable" | "java/io/Serializable")
            }
            (Some(_), None) => return false,
            (None, None) => {}
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(header) = self.header(current) {
                queue.extend(header.super_name.as_deref());
                queue.extend(header.interfaces.iter().map(String::as_str));
            }
        }
        false
    }

    /// Array covariance on element descriptors. Primitive elements must match.
    fn is_element_assignable(&self, to: &str, from: &str) -> bool {
        fn object(e: &str) -> Option<&str> {
            e.strip_prefix('L').and_then(|e| e.strip_suffix(';'))
        }
        match (object(to), object(from)) {
            (Some(to), Some(from)) => self.is_assignable(to, from),
            (Some(to), None) if from.starts_with('[') => self.is_assignable(to, from),
            (None, None) if to.starts_with('[') && from.starts_with('[') => {
                self.is_assignable(to, from)
            }
            _ => to == from,
        }
    }
}

impl TypeHierarchy for ClassHierarchy {
    fn common_supertype(&self, a: &str, b: &str) -> String {
        if self.is_assignable(a, b) {
            return a.to_string();
        }
        if self.is_assignable(b, a) {
            return b.to_string();
        }
        if self.is_interface(a) || self.is_interface(b) {
            return OBJECT.to_string();
        }
        let mut seen = HashSet::new();
        let mut current = self.super_of(a);
        while let Some(candidate) = current {
            if !seen.insert(candidate) {
                break;
            }
            if self.is_assignable(candidate, b) {
                return candidate.to_string();
            }
            current = self.super_of(candidate);
        }
        OBJECT.to_string()
    }

    fn is_assignable(&self, to: &str, from: &str) -> bool {
        Self::is_assignable(self, to, from)
    }
}
