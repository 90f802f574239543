//! Region files: up to 32×32 chunks in one file.
//!
//! ```text
//! 0..4096      location table, 1024 × u32 BE (sector_offset << 8 | sector_count)
//! 4096..8192   timestamp table, 1024 × u32 BE (seconds)
//! 8192..       chunk records in 4 KiB sectors:
//!              u32 BE length (including the scheme byte) ‖ u8 scheme ‖ data
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use lodestone_common::ChunkPos;

pub const SECTOR_BYTES: usize = 4096;
pub const HEADER_BYTES: usize = SECTOR_BYTES * 2;
pub const CHUNKS_PER_REGION: usize = 1024;

/// Largest record a location entry can describe.
pub const MAX_CHUNK_SECTORS: usize = 255;

pub const SCHEME_GZIP: u8 = 1;
pub const SCHEME_ZLIB: u8 = 2;
pub const SCHEME_NONE: u8 = 3;

const RECORD_HEADER: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("cannot open region {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("chunk {pos}: record length {len} does not fit {sectors} sectors")]
    BadLength {
        pos: ChunkPos,
        len: usize,
        sectors: usize,
    },
    #[error("chunk {pos}: unknown compression scheme {scheme}")]
    UnknownScheme { pos: ChunkPos, scheme: u8 },
    #[error("chunk {pos}: {len} bytes compressed exceeds {MAX_CHUNK_SECTORS} sectors")]
    TooLarge { pos: ChunkPos, len: usize },
}

fn local_index(pos: ChunkPos) -> usize {
    let (x, z) = pos.region_local();
    x + z * 32
}

fn sectors_for(bytes: usize) -> usize {
    bytes.div_ceil(SECTOR_BYTES)
}

/// An open region file.
///
/// Not internally synchronized; [`crate::RegionFileCache`] hands it out behind
/// a mutex.
#[derive(Debug)]
pub struct RegionFile {
    path: PathBuf,
    file: File,
    locations: Vec<u32>,
    timestamps: Vec<u32>,
    /// One flag per sector in the file; the two header sectors are always set.
    used: Vec<bool>,
}

impl RegionFile {
    /// Open `path`, creating an empty region if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegionError> {
        let path = path.as_ref().to_path_buf();
        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path);
        let file = match opened {
            Ok(file) => file,
            Err(source) => return Err(RegionError::Open { path, source }),
        };
        let mut region = Self {
            path,
            file,
            locations: vec![0; CHUNKS_PER_REGION],
            timestamps: vec![0; CHUNKS_PER_REGION],
            used: vec![true, true],
        };
        region.load_header()?;
        Ok(region)
    }

    fn load_header(&mut self) -> Result<(), RegionError> {
        let len = self.file.metadata()?.len() as usize;
        if len < HEADER_BYTES {
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(&[0; HEADER_BYTES])?;
            self.file.flush()?;
            return Ok(());
        }
        // Pad a torn tail so every sector is whole.
        if len % SECTOR_BYTES != 0 {
            self.file
                .set_len((sectors_for(len) * SECTOR_BYTES) as u64)?;
        }

        let mut header = vec![0u8; HEADER_BYTES];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut header)?;
        let words = header
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
        for (i, word) in words.enumerate() {
            if i < CHUNKS_PER_REGION {
                self.locations[i] = word;
            } else {
                self.timestamps[i - CHUNKS_PER_REGION] = word;
            }
        }

        let total = sectors_for(len);
        self.used = vec![false; total];
        self.used[0] = true;
        self.used[1] = true;
        for i in 0..CHUNKS_PER_REGION {
            let (offset, count) = split_location(self.locations[i]);
            if count == 0 {
                continue;
            }
            if offset < 2 || offset + count > total {
                tracing::warn!(
                    path = %self.path.display(),
                    index = i,
                    offset,
                    count,
                    "dropping region entry outside the file"
                );
                self.locations[i] = 0;
                continue;
            }
            self.used[offset..offset + count].fill(true);
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_chunk(&self, pos: ChunkPos) -> bool {
        self.locations[local_index(pos)] != 0
    }

    /// Seconds timestamp of the last write, zero if never written.
    pub fn timestamp(&self, pos: ChunkPos) -> u32 {
        self.timestamps[local_index(pos)]
    }

    pub fn chunk_count(&self) -> usize {
        self.locations.iter().filter(|&&l| l != 0).count()
    }

    /// Sectors in the file, header included.
    pub fn sector_count(&self) -> usize {
        self.used.len()
    }

    /// Decompressed record for `pos`, or `None` if nothing is stored there.
    pub fn read_chunk(&mut self, pos: ChunkPos) -> Result<Option<Vec<u8>>, RegionError> {
        let (offset, count) = split_location(self.locations[local_index(pos)]);
        if count == 0 {
            return Ok(None);
        }
        self.file
            .seek(SeekFrom::Start((offset * SECTOR_BYTES) as u64))?;
        let mut head = [0u8; RECORD_HEADER];
        self.file.read_exact(&mut head)?;
        let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
        if len == 0 || len + 4 > count * SECTOR_BYTES {
            return Err(RegionError::BadLength {
                pos,
                len,
                sectors: count,
            });
        }
        let mut data = vec![0u8; len - 1];
        self.file.read_exact(&mut data)?;

        let mut out = Vec::new();
        match head[4] {
            SCHEME_ZLIB => {
                ZlibDecoder::new(&data[..]).read_to_end(&mut out)?;
            }
            SCHEME_GZIP => {
                GzDecoder::new(&data[..]).read_to_end(&mut out)?;
            }
            SCHEME_NONE => out = data,
            scheme => return Err(RegionError::UnknownScheme { pos, scheme }),
        }
        Ok(Some(out))
    }

    /// Store `data` for `pos`, zlib-compressed. The record is rewritten in
    /// place when it still fits its old sectors, otherwise moved to the first
    /// free run (or the end of the file).
    pub fn write_chunk(
        &mut self,
        pos: ChunkPos,
        data: &[u8],
        timestamp: u32,
    ) -> Result<(), RegionError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let needed = sectors_for(compressed.len() + RECORD_HEADER);
        if needed > MAX_CHUNK_SECTORS {
            return Err(RegionError::TooLarge {
                pos,
                len: compressed.len(),
            });
        }

        let index = local_index(pos);
        let (old_offset, old_count) = split_location(self.locations[index]);
        // Old sectors stay marked used until the new record and header entry
        // are on disk.
        let offset = if old_count != 0 && needed <= old_count {
            old_offset
        } else {
            self.allocate(needed)
        };

        let mut record = Vec::with_capacity(needed * SECTOR_BYTES);
        record.extend_from_slice(&((compressed.len() + 1) as u32).to_be_bytes());
        record.push(SCHEME_ZLIB);
        record.extend_from_slice(&compressed);
        record.resize(needed * SECTOR_BYTES, 0);

        self.file
            .seek(SeekFrom::Start((offset * SECTOR_BYTES) as u64))?;
        self.file.write_all(&record)?;
        let location = ((offset as u32) << 8) | needed as u32;
        self.write_header_entry(index, location, timestamp)?;
        self.file.flush()?;

        if old_count != 0 {
            self.used[old_offset..old_offset + old_count].fill(false);
        }
        if self.used.len() < offset + needed {
            self.used.resize(offset + needed, false);
        }
        self.used[offset..offset + needed].fill(true);
        self.locations[index] = location;
        self.timestamps[index] = timestamp;
        tracing::trace!(%pos, offset, sectors = needed, "chunk record written");
        Ok(())
    }

    /// First run of `count` free sectors, or the end of the file.
    fn allocate(&self, count: usize) -> usize {
        let mut run = 0;
        for (i, &used) in self.used.iter().enumerate() {
            if used {
                run = 0;
                continue;
            }
            run += 1;
            if run == count {
                return i + 1 - count;
            }
        }
        // A free tail shorter than `count` is extended.
        self.used.len() - run
    }

    fn write_header_entry(&mut self, index: usize, location: u32, timestamp: u32) -> io::Result<()> {
        self.file.seek(SeekFrom::Start((index * 4) as u64))?;
        self.file.write_all(&location.to_be_bytes())?;
        self.file
            .seek(SeekFrom::Start((SECTOR_BYTES + index * 4) as u64))?;
        self.file.write_all(&timestamp.to_be_bytes())
    }
}

fn split_location(location: u32) -> (usize, usize) {
    ((location >> 8) as usize, (location & 0xff) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RegionFile) {
        let tmp = tempfile::tempdir().unwrap();
        let region = RegionFile::open(tmp.path().join("r.0.0.mca")).unwrap();
        (tmp, region)
    }

    #[test]
    fn new_region_has_only_a_header() {
        let (_tmp, mut region) = open_temp();
        assert_eq!(region.chunk_count(), 0);
        assert_eq!(
            std::fs::metadata(region.path()).unwrap().len(),
            HEADER_BYTES as u64
        );
        assert!(region.read_chunk(ChunkPos::new(3, 4)).unwrap().is_none());
    }

    #[test]
    fn write_then_read_back() {
        let (_tmp, mut region) = open_temp();
        let pos = ChunkPos::new(-1, 33);
        region.write_chunk(pos, b"column data", 1234).unwrap();
        assert!(region.has_chunk(pos));
        assert_eq!(region.timestamp(pos), 1234);
        assert_eq!(
            region.read_chunk(pos).unwrap().as_deref(),
            Some(&b"column data"[..])
        );
        // Same local slot: (31, 1).
        assert!(region.has_chunk(ChunkPos::new(31, 1)));
        assert!(!region.has_chunk(ChunkPos::new(0, 0)));
    }

    #[test]
    fn entries_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("r.0.0.mca");
        {
            let mut region = RegionFile::open(&path).unwrap();
            region.write_chunk(ChunkPos::new(1, 2), b"one", 1).unwrap();
            region.write_chunk(ChunkPos::new(5, 6), b"two", 2).unwrap();
        }
        let mut region = RegionFile::open(&path).unwrap();
        assert_eq!(region.chunk_count(), 2);
        assert_eq!(region.timestamp(ChunkPos::new(5, 6)), 2);
        assert_eq!(
            region.read_chunk(ChunkPos::new(1, 2)).unwrap().unwrap(),
            b"one"
        );
    }

    #[test]
    fn rewrite_reuses_sectors_when_it_fits() {
        let (_tmp, mut region) = open_temp();
        let pos = ChunkPos::new(0, 0);
        region.write_chunk(pos, &[7u8; 100], 1).unwrap();
        let sectors = region.sector_count();
        region.write_chunk(pos, &[9u8; 50], 2).unwrap();
        assert_eq!(region.sector_count(), sectors);
        assert_eq!(region.read_chunk(pos).unwrap().unwrap(), vec![9u8; 50]);
    }

    /// High-entropy bytes that zlib cannot shrink.
    fn noise(len: usize, mut state: u64) -> Vec<u8> {
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    fn offset_of(region: &RegionFile, pos: ChunkPos) -> usize {
        split_location(region.locations[local_index(pos)]).0
    }

    #[test]
    fn growing_record_moves_and_frees_old_sectors() {
        let (_tmp, mut region) = open_temp();
        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(1, 0);
        region.write_chunk(a, b"small", 1).unwrap();
        region.write_chunk(b, b"other", 1).unwrap();
        assert_eq!(offset_of(&region, a), 2);
        assert_eq!(offset_of(&region, b), 3);

        let big = noise(20_000, 0x9e37_79b9_7f4a_7c15);
        region.write_chunk(a, &big, 2).unwrap();
        assert_eq!(offset_of(&region, a), 4);
        assert!(region.sector_count() >= 4 + sectors_for(20_000));
        assert_eq!(region.read_chunk(a).unwrap().unwrap(), big);
        assert_eq!(region.read_chunk(b).unwrap().unwrap(), b"other");

        // First fit lands in the sector `a` left behind.
        let before = region.sector_count();
        let c = ChunkPos::new(2, 0);
        region.write_chunk(c, b"tiny", 3).unwrap();
        assert_eq!(offset_of(&region, c), 2);
        assert_eq!(region.sector_count(), before);
        assert_eq!(region.read_chunk(a).unwrap().unwrap(), big);
    }

    #[test]
    fn failed_relocation_keeps_old_record() {
        let (_tmp, mut region) = open_temp();
        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(1, 0);
        region.write_chunk(a, b"alpha", 1).unwrap();
        region.write_chunk(b, b"beta", 1).unwrap();
        let path = region.path().to_path_buf();

        // Writes through a read-only handle fail after the sectors are chosen.
        region.file = File::open(&path).unwrap();
        assert!(region.write_chunk(a, &noise(20_000, 7), 2).is_err());
        assert_eq!(offset_of(&region, a), 2);
        assert_eq!(region.timestamp(a), 1);

        region.file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let c = ChunkPos::new(2, 0);
        region.write_chunk(c, b"gamma", 3).unwrap();
        assert_ne!(offset_of(&region, c), offset_of(&region, a));
        assert_eq!(region.read_chunk(a).unwrap().unwrap(), b"alpha");
        assert_eq!(region.read_chunk(c).unwrap().unwrap(), b"gamma");
    }

    #[test]
    fn corrupt_length_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("r.0.0.mca");
        {
            let mut region = RegionFile::open(&path).unwrap();
            region.write_chunk(ChunkPos::new(0, 0), b"data", 1).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_BYTES..HEADER_BYTES + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut region = RegionFile::open(&path).unwrap();
        assert!(matches!(
            region.read_chunk(ChunkPos::new(0, 0)),
            Err(RegionError::BadLength { .. })
        ));
    }
}
