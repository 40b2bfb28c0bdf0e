use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::PathBuf;

/// Finds the bytes of a class by its internal name, e.g. `java/lang/Object`.
pub trait ClassProvider: Debug {

    fn get_class(&self, classpath: &str) -> Option<Vec<u8>>;

}

/// Search path of class directories. The first directory holding
/// `<classpath>.class` wins.
#[derive(Debug, Default, Clone)]
pub struct DirectoryProvider {
    pub roots: Vec<PathBuf>,
}

impl DirectoryProvider {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl ClassProvider for DirectoryProvider {
    fn get_class(&self, classpath: &str) -> Option<Vec<u8>> {
        self.roots.iter().find_map(|root| {
            let mut path = root.clone();
            path.push(format!("{classpath}.class"));

            fs::read(&path).ok().map(|bytes| {
                log::debug!("loaded {} from {}", classpath, path.display());
                bytes
            })
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    classes: HashMap<String, Vec<u8>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, classpath: &str, bytes: Vec<u8>) {
        self.classes.insert(classpath.to_string(), bytes);
    }
}

impl ClassProvider for MemoryProvider {
    fn get_class(&self, classpath: &str) -> Option<Vec<u8>> {
        self.classes.get(classpath).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        fs::create_dir_all(second.path().join("a/b")).unwrap();
        fs::write(second.path().join("a/b/C.class"), [2]).unwrap();

        let provider = DirectoryProvider::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(provider.get_class("a/b/C"), Some(vec![2]));

        fs::create_dir_all(first.path().join("a/b")).unwrap();
        fs::write(first.path().join("a/b/C.class"), [1]).unwrap();
        assert_eq!(provider.get_class("a/b/C"), Some(vec![1]));

        assert_eq!(provider.get_class("a/b/D"), None);
    }

    #[test]
    fn memory_provider_returns_copies() {
        let mut provider = MemoryProvider::new();
        provider.insert("A", vec![0xCA, 0xFE]);

        assert_eq!(provider.get_class("A"), Some(vec![0xCA, 0xFE]));
        assert_eq!(provider.get_class("B"), None);
    }
}
