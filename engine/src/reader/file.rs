use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::ReadError;
use crate::reader::{SourcePath, SourceReader};

/// Local filesystem reader. Registered last as the catch-all: any reference
/// the other readers decline is treated as a path, resolved against the
/// base directory when relative.
pub struct FileReader {
    base_dir: PathBuf,
}

impl FileReader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileReader {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl SourceReader for FileReader {
    fn supports(&self, _reference: &str) -> bool {
        true
    }

    fn read(&self, reference: &str) -> Result<String, ReadError> {
        let resolved = self.resolve(reference);
        std::fs::read_to_string(&resolved).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ReadError::NotFound {
                reference: reference.to_string(),
                detail: e.to_string(),
            },
            _ => ReadError::Io {
                reference: reference.to_string(),
                detail: e.to_string(),
            },
        })
    }

    fn parse_path(&self, reference: &str) -> SourcePath {
        let path = Path::new(reference);
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| reference.to_string());
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        SourcePath { file, path: dir }
    }
}
