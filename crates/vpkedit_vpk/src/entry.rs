//! In-memory representation of archive entries.

use bon::Builder;

use crate::checksum;
use crate::compression::CompressionMethod;

/// Per entry settings applied when the archive is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Builder)]
pub struct EntryOptions {
    /// Number of leading bytes stored inline in the directory tree
    ///
    /// Clamped to the entry's length when the archive is written.
    #[builder(default)]
    pub preload_length: u16,

    /// Place the entry alone in a freshly allocated chunk instead of the shared one
    #[builder(default)]
    pub dedicated_chunk: bool,
}

/// Location of an entry's non-preload bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Chunk index, or [`crate::types::DIR_INDEX`] for data embedded in the directory file
    pub archive_index: u16,
    /// Offset inside the chunk
    pub offset: u32,
    /// Number of stored bytes, after compression
    pub length: u32,
    /// How the stored bytes are encoded
    pub compression: CompressionMethod,
}

#[derive(Debug, Clone)]
pub(crate) enum EntryData {
    /// Bytes added in memory and not yet written
    Staged(Vec<u8>),
    /// Bytes living in the directory file and chunks on disk
    Stored {
        preload: Vec<u8>,
        location: ChunkLocation,
    },
}

/// A file inside the archive
#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) length: u32,
    pub(crate) crc32: u32,
    pub(crate) md5: Option<[u8; 16]>,
    pub(crate) options: EntryOptions,
    pub(crate) data: EntryData,
}

impl Entry {
    pub(crate) fn staged(data: Vec<u8>, options: EntryOptions) -> Self {
        Self {
            length: data.len() as u32,
            crc32: checksum::crc32(&data),
            md5: None,
            options,
            data: EntryData::Staged(data),
        }
    }

    /// Size of the file when extracted
    pub fn length(&self) -> u32 {
        self.length
    }

    /// CRC32 of the uncompressed bytes
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// MD5 of the stored chunk payload, when the archive generates them
    pub fn md5(&self) -> Option<[u8; 16]> {
        self.md5
    }

    /// Options used the next time the archive is written
    pub fn options(&self) -> EntryOptions {
        self.options
    }

    /// Bytes available without touching a chunk
    ///
    /// For entries read from disk these are the preload bytes from the directory tree. Entries
    /// added since the last save keep their whole content in memory and expose the prefix that
    /// will be preloaded.
    pub fn preload(&self) -> &[u8] {
        match &self.data {
            EntryData::Staged(bytes) => {
                let len = (self.options.preload_length as usize).min(bytes.len());
                &bytes[..len]
            }
            EntryData::Stored { preload, .. } => preload,
        }
    }

    /// Where the rest of the entry lives on disk, if it has been written
    pub fn location(&self) -> Option<&ChunkLocation> {
        match &self.data {
            EntryData::Staged(_) => None,
            EntryData::Stored { location, .. } => Some(location),
        }
    }

    /// Whether the entry only exists in memory
    pub fn is_staged(&self) -> bool {
        matches!(self.data, EntryData::Staged(_))
    }

    /// Whether the stored payload is compressed
    pub fn is_compressed(&self) -> bool {
        self.location()
            .is_some_and(|l| l.compression != CompressionMethod::None)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Entry, EntryOptions};

    #[test]
    fn staged_entry_exposes_preload_prefix() {
        let entry = Entry::staged(
            b"0123456789".to_vec(),
            EntryOptions::builder().preload_length(4).build(),
        );

        assert_eq!(entry.length(), 10);
        assert_eq!(entry.crc32(), crate::checksum::crc32(b"0123456789"));
        assert_eq!(entry.preload(), b"0123");
        assert!(entry.is_staged());
        assert!(entry.location().is_none());
        assert!(!entry.is_compressed());
    }

    #[test]
    fn preload_is_clamped_to_length() {
        let entry = Entry::staged(
            b"abc".to_vec(),
            EntryOptions::builder().preload_length(64).build(),
        );
        assert_eq!(entry.preload(), b"abc");
    }
}
