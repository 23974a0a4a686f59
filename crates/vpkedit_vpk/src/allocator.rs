//! Assignment of entry payloads to chunks.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::DIR_INDEX;

/// Largest directory file allowed in single-file mode
pub const SINGLE_FILE_LIMIT: u64 = 4 * 1024 * 1024 * 1024;

/// Default packing threshold for multi-chunk archives
pub const DEFAULT_CHUNK_SIZE: u64 = 200 * 1024 * 1024;

/// Where a payload was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Chunk index, or [`DIR_INDEX`] for data embedded in the directory file
    pub archive_index: u16,
    /// Offset inside the chunk
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    SingleFile,
    MultiChunk { limit: u64 },
}

/// Packs payloads into chunks in the order they are offered
///
/// In multi-chunk mode a new chunk is opened whenever the payload would push the current chunk
/// past the limit. A payload larger than the limit still gets a chunk of its own. In single-file
/// mode everything lands in the directory file.
#[derive(Debug, Clone)]
pub struct ChunkAllocator {
    mode: Mode,
    current: Option<u16>,
    next_index: u16,
    chunks: BTreeMap<u16, u64>,
}

impl ChunkAllocator {
    /// Allocator for archives split over numbered chunk files
    pub fn multi_chunk(limit: u64) -> Self {
        Self {
            mode: Mode::MultiChunk { limit },
            current: None,
            next_index: 0,
            chunks: BTreeMap::new(),
        }
    }

    /// Allocator for archives embedding all data in the directory file
    pub fn single_file() -> Self {
        Self {
            mode: Mode::SingleFile,
            current: None,
            next_index: 0,
            chunks: BTreeMap::new(),
        }
    }

    /// Place a payload of `size` bytes
    ///
    /// `dedicated` requests a fresh chunk holding only this payload; it has no effect in
    /// single-file mode. Empty payloads are not placed anywhere.
    pub fn allocate(&mut self, size: u64, dedicated: bool) -> Result<Slot> {
        if size == 0 {
            return Ok(Slot {
                archive_index: DIR_INDEX,
                offset: 0,
            });
        }

        let index = match self.mode {
            Mode::SingleFile => DIR_INDEX,
            Mode::MultiChunk { .. } if dedicated => {
                let index = self.open_chunk()?;
                debug!(index, size, "placing payload in dedicated chunk");
                index
            }
            Mode::MultiChunk { limit } => match self.current {
                Some(index) if self.chunks[&index] + size <= limit => index,
                _ => {
                    let index = self.open_chunk()?;
                    self.current = Some(index);
                    index
                }
            },
        };

        let used = self.chunks.entry(index).or_insert(0);
        let offset = *used;
        if offset > u32::MAX as u64 || size > u32::MAX as u64 {
            return Err(Error::ChunkSizeExceeded {
                size: offset + size,
                limit: u32::MAX as u64,
            });
        }
        *used += size;

        Ok(Slot {
            archive_index: index,
            offset: offset as u32,
        })
    }

    fn open_chunk(&mut self) -> Result<u16> {
        let index = self.next_index;
        if index >= DIR_INDEX {
            return Err(Error::ChunkSizeExceeded {
                size: index as u64 + 1,
                limit: DIR_INDEX as u64,
            });
        }
        self.next_index += 1;
        self.chunks.insert(index, 0);
        Ok(index)
    }

    /// Bytes placed in each chunk so far
    pub fn chunks(&self) -> &BTreeMap<u16, u64> {
        &self.chunks
    }

    /// Bytes placed in the directory file
    pub fn embedded_size(&self) -> u64 {
        self.chunks.get(&DIR_INDEX).copied().unwrap_or(0)
    }
}

/// Refuse single-file layouts reaching [`SINGLE_FILE_LIMIT`]
pub fn ensure_single_file_fits(total: u64) -> Result<()> {
    if total >= SINGLE_FILE_LIMIT {
        return Err(Error::ChunkSizeExceeded {
            size: total,
            limit: SINGLE_FILE_LIMIT,
        });
    }
    Ok(())
}
