use std::collections::{HashMap, HashSet};

use crate::error::ReadError;
use crate::reader::{SourcePath, SourceReader};

/// Memoizing wrapper around reader access.
///
/// Entries are keyed by the source reference; references on the exclude-list
/// always bypass the cache. The cache may outlive individual executions —
/// two reads of the same reference within one execution are observationally
/// identical.
pub struct SourceCache {
    entries: HashMap<String, (String, SourcePath)>,
    exclude: HashSet<String>,
}

impl SourceCache {
    pub fn new() -> Self {
        SourceCache {
            entries: HashMap::new(),
            exclude: HashSet::new(),
        }
    }

    pub fn read(
        &mut self,
        reader: &dyn SourceReader,
        reference: &str,
    ) -> Result<(String, SourcePath), ReadError> {
        let cacheable = !self.exclude.contains(reference);
        if cacheable {
            if let Some((content, parsed)) = self.entries.get(reference) {
                return Ok((content.clone(), parsed.clone()));
            }
        }
        let content = reader.read(reference)?;
        let parsed = reader.parse_path(reference);
        if cacheable {
            self.entries
                .insert(reference.to_string(), (content.clone(), parsed.clone()));
        }
        Ok((content, parsed))
    }

    /// Mark a reference as always bypassing the cache.
    pub fn exclude(&mut self, reference: impl Into<String>) {
        self.exclude.insert(reference.into());
    }

    pub fn clear_cache(&mut self) {
        self.entries.clear();
    }
}

impl Default for SourceCache {
    fn default() -> Self {
        SourceCache::new()
    }
}
