use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lodestone_common::ChunkPos;

use crate::region::{RegionError, RegionFile};

/// A region handle shared by every caller that asks for the same file.
pub type SharedRegion = Arc<Mutex<RegionFile>>;

/// Process-wide table of open region files, keyed by path.
///
/// Lookup-or-open is atomic per key: concurrent callers for the same region
/// get the same handle, and the file is opened once. A failed open is not
/// cached; the error goes back to the caller and the next call tries again.
#[derive(Debug)]
pub struct RegionFileCache {
    extension: String,
    regions: DashMap<PathBuf, SharedRegion>,
}

impl RegionFileCache {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            regions: DashMap::new(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `<root>/region/r.<chunk_x >> 5>.<chunk_z >> 5>.<ext>`
    pub fn region_path(&self, root: &Path, chunk_x: i32, chunk_z: i32) -> PathBuf {
        let region = ChunkPos::new(chunk_x, chunk_z).region();
        root.join("region").join(region.file_name(&self.extension))
    }

    /// Handle for the region holding chunk `(chunk_x, chunk_z)`, opening it
    /// (and its directory) on first use.
    pub fn get(
        &self,
        root: &Path,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Result<SharedRegion, RegionError> {
        let path = self.region_path(root, chunk_x, chunk_z);
        if let Some(region) = self.regions.get(&path) {
            return Ok(Arc::clone(region.value()));
        }

        // The shard stays locked while the file opens, so racing callers wait
        // here and then find the inserted handle.
        match self.regions.entry(path) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let path = entry.key().clone();
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).map_err(|source| RegionError::Open {
                        path: path.clone(),
                        source,
                    })?;
                }
                let region = match RegionFile::open(&path) {
                    Ok(region) => region,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "region open failed");
                        return Err(err);
                    }
                };
                tracing::debug!(
                    path = %path.display(),
                    chunks = region.chunk_count(),
                    "region opened"
                );
                let shared = Arc::new(Mutex::new(region));
                entry.insert(Arc::clone(&shared));
                Ok(shared)
            }
        }
    }

    /// Number of open regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn is_open(&self, root: &Path, chunk_x: i32, chunk_z: i32) -> bool {
        self.regions
            .contains_key(&self.region_path(root, chunk_x, chunk_z))
    }
}

impl Default for RegionFileCache {
    fn default() -> Self {
        Self::new("mca")
    }
}
