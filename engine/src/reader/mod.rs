pub mod file;
pub mod github;
pub mod http;

pub use file::FileReader;
pub use github::GithubReader;
pub use http::HttpReader;

use std::path::Path;

use crate::error::ReadError;

/// Provenance descriptor for an included source, used to populate
/// `__FILE__` / `__PATH__` for the included content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePath {
    pub file: String,
    pub path: String,
}

/// A pluggable source reader: maps a source reference to its content plus a
/// parsed path descriptor.
pub trait SourceReader {
    fn supports(&self, reference: &str) -> bool;

    /// Read the full content of the reference, blocking until complete.
    fn read(&self, reference: &str) -> Result<String, ReadError>;

    fn parse_path(&self, reference: &str) -> SourcePath;
}

/// Ordered reader collection; the first reader whose `supports` accepts a
/// reference wins.
pub struct ReaderRegistry {
    readers: Vec<Box<dyn SourceReader>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        ReaderRegistry {
            readers: Vec::new(),
        }
    }

    /// The stock registry: git-hosting, then HTTP, then the filesystem
    /// catch-all resolving relative paths against `base_dir`.
    pub fn with_defaults(base_dir: impl AsRef<Path>) -> Self {
        let mut registry = ReaderRegistry::new();
        registry.register(Box::new(GithubReader::new()));
        registry.register(Box::new(HttpReader::new()));
        registry.register(Box::new(FileReader::new(base_dir.as_ref())));
        registry
    }

    pub fn register(&mut self, reader: Box<dyn SourceReader>) {
        self.readers.push(reader);
    }

    pub fn select(&self, reference: &str) -> Result<&dyn SourceReader, ReadError> {
        self.readers
            .iter()
            .find(|r| r.supports(reference))
            .map(|r| r.as_ref())
            .ok_or_else(|| ReadError::Unsupported {
                reference: reference.to_string(),
            })
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        ReaderRegistry::new()
    }
}
