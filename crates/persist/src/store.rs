//! Region-backed world persistence.
//!
//! Layout inside the world directory:
//! ```text
//! level.json          - metadata and format version
//! region/
//!   r.<x>.<z>.mca     - 32×32 chunk regions
//! ```

use std::path::{Path, PathBuf};
use std::sync::{MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use fastnbt::Value;
use lodestone_common::ChunkPos;
use lodestone_kernel::{BlockRegistry, Chunk, Dimension};
use serde::{Deserialize, Serialize};

use crate::anvil::{ChunkLoadError, load_chunk, save_chunk};
use crate::cache::{RegionFileCache, SharedRegion};
use crate::region::{RegionError, RegionFile};

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("format version mismatch: file has v{file_version}, expected v{expected_version}")]
    FormatMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("chunk {pos}: {source}")]
    Region {
        pos: ChunkPos,
        #[source]
        source: RegionError,
    },
    #[error("chunk {pos}: NBT error: {reason}")]
    Nbt { pos: ChunkPos, reason: String },
    #[error("chunk {pos}: {source}")]
    Load {
        pos: ChunkPos,
        #[source]
        source: ChunkLoadError,
    },
    #[error("chunk stored for {expected} claims to be {found}")]
    Misplaced { expected: ChunkPos, found: ChunkPos },
}

/// Metadata stored in level.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub format_version: u32,
    pub dimension: Dimension,
    /// World tick at the last save.
    pub tick: u64,
}

/// Outcome of a bulk save; failures are logged per chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: Vec<ChunkPos>,
}

/// Chunk load/save through a shared [`RegionFileCache`].
#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
    meta: WorldMeta,
    cache: RegionFileCache,
}

fn lock(region: &SharedRegion) -> MutexGuard<'_, RegionFile> {
    region.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        tracing::warn!("region lock poisoned, continuing");
        poisoned.into_inner()
    })
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

impl ChunkStore {
    /// Open or create a world directory.
    pub fn open(
        path: impl AsRef<Path>,
        extension: &str,
        dimension: Dimension,
    ) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("region"))?;

        let meta_path = root.join("level.json");
        let meta = if meta_path.exists() {
            let meta: WorldMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.format_version != FORMAT_VERSION {
                return Err(StoreError::FormatMismatch {
                    file_version: meta.format_version,
                    expected_version: FORMAT_VERSION,
                });
            }
            if meta.dimension != dimension {
                tracing::warn!(
                    stored = ?meta.dimension,
                    requested = ?dimension,
                    "dimension differs from level.json, keeping the stored one"
                );
            }
            meta
        } else {
            let meta = WorldMeta {
                format_version: FORMAT_VERSION,
                dimension,
                tick: 0,
            };
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            meta
        };
        tracing::info!(root = %root.display(), tick = meta.tick, "world store opened");

        Ok(Self {
            root,
            meta,
            cache: RegionFileCache::new(extension),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    pub fn cache(&self) -> &RegionFileCache {
        &self.cache
    }

    /// Load the chunk at `pos`, or `None` if it was never saved.
    pub fn load(&self, pos: ChunkPos, blocks: &BlockRegistry) -> Result<Option<Chunk>, StoreError> {
        let region = self
            .cache
            .get(&self.root, pos.x, pos.z)
            .map_err(|source| StoreError::Region { pos, source })?;
        let data = lock(&region)
            .read_chunk(pos)
            .map_err(|source| StoreError::Region { pos, source })?;
        let Some(data) = data else {
            return Ok(None);
        };

        let tree: Value = fastnbt::from_bytes(&data).map_err(|e| StoreError::Nbt {
            pos,
            reason: e.to_string(),
        })?;
        let chunk = load_chunk(&tree, blocks).map_err(|source| StoreError::Load { pos, source })?;
        if chunk.pos() != pos {
            return Err(StoreError::Misplaced {
                expected: pos,
                found: chunk.pos(),
            });
        }
        Ok(Some(chunk))
    }

    pub fn save(&self, chunk: &Chunk) -> Result<(), StoreError> {
        let pos = chunk.pos();
        let data = fastnbt::to_bytes(&save_chunk(chunk)).map_err(|e| StoreError::Nbt {
            pos,
            reason: e.to_string(),
        })?;
        let region = self
            .cache
            .get(&self.root, pos.x, pos.z)
            .map_err(|source| StoreError::Region { pos, source })?;
        lock(&region)
            .write_chunk(pos, &data, now_secs())
            .map_err(|source| StoreError::Region { pos, source })
    }

    /// Save every chunk, logging and counting failures instead of stopping.
    pub fn save_all<'a>(&self, chunks: impl IntoIterator<Item = &'a Chunk>) -> SaveReport {
        let mut report = SaveReport::default();
        for chunk in chunks {
            match self.save(chunk) {
                Ok(()) => report.saved += 1,
                Err(err) => {
                    tracing::error!(pos = %chunk.pos(), %err, "chunk save failed");
                    report.failed.push(chunk.pos());
                }
            }
        }
        report
    }

    /// Record the current tick in level.json.
    pub fn write_meta(&mut self, tick: u64) -> Result<(), StoreError> {
        self.meta.tick = tick;
        let path = self.root.join("level.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }
}
