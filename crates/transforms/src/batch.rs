use indexmap::IndexMap;

/// Class bytes keyed by internal name, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassBatch {
    classes: IndexMap<String, Vec<u8>>,
}

impl ClassBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a class, returning the previous bytes.
    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.classes.insert(name.into(), bytes)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.classes.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.classes.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn into_inner(self) -> IndexMap<String, Vec<u8>> {
        self.classes
    }
}

impl FromIterator<(String, Vec<u8>)> for ClassBatch {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self {
            classes: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ClassBatch {
    type Item = (String, Vec<u8>);
    type IntoIter = indexmap::map::IntoIter<String, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.classes.into_iter()
    }
}
