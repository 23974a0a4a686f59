//! Opening archives and fetching entry bytes.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::allocator::DEFAULT_CHUNK_SIZE;
use crate::archive::{Archive, ArchiveSource, Version, VpkOptions};
use crate::compression::{decode_payload, uncompressed_length, CompressionMethod};
use crate::directory::read_directory;
use crate::entry::{ChunkLocation, Entry, EntryData, EntryOptions};
use crate::error::{EntryNotFoundError, Error, Result};
use crate::tree::EntryTree;
use crate::types::DIR_INDEX;

impl ArchiveSource {
    /// Read the stored bytes of a payload, without decoding them
    pub(crate) fn read_stored(&self, location: &ChunkLocation) -> Result<Vec<u8>> {
        if location.length == 0 {
            return Ok(Vec::new());
        }

        let (path, start) = self.locate(location);
        let mut file = File::open(&path).map_err(Error::file_access(&path))?;
        file.seek(SeekFrom::Start(start))
            .map_err(Error::file_access(&path))?;

        let mut stored = vec![0; location.length as usize];
        file.read_exact(&mut stored)
            .map_err(Error::file_access(&path))?;
        Ok(stored)
    }
}

/// Open file handles reused while scanning compressed payloads during open
#[derive(Default)]
struct ChunkReaders {
    files: HashMap<PathBuf, BufReader<File>>,
}

impl ChunkReaders {
    fn uncompressed_length(&mut self, path: PathBuf, start: u64) -> Result<u32> {
        let reader = match self.files.entry(path) {
            std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
            std::collections::hash_map::Entry::Vacant(slot) => {
                let file = File::open(slot.key()).map_err(Error::file_access(slot.key()))?;
                slot.insert(BufReader::new(file))
            }
        };
        reader.seek(SeekFrom::Start(start))?;
        uncompressed_length(reader)
            .map_err(|_| Error::CorruptPayload("missing uncompressed length".into()))
    }
}

impl Archive {
    /// Open the directory file at `path`
    ///
    /// Only the directory is read. Entry data stays in the chunk files until requested, apart
    /// from the length prefix of compressed payloads.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(Error::file_access(path))?;
        let directory = read_directory(&mut BufReader::new(file))?;

        let version = Version::try_from(directory.header.version)?;
        let md5_by_range: HashMap<(u32, u32, u32), [u8; 16]> = directory
            .archive_md5
            .iter()
            .map(|r| ((r.archive_index, r.offset, r.length), r.checksum))
            .collect();

        let mut source = ArchiveSource {
            path: path.to_path_buf(),
            data_offset: directory.data_offset,
            chunks: BTreeMap::new(),
            archive_md5: directory.archive_md5.clone(),
            other_md5: directory.other_md5,
        };
        let mut readers = ChunkReaders::default();
        let mut tree = EntryTree::new();
        let mut compression = CompressionMethod::None;

        for item in directory.entries {
            let record = item.record;
            let location = ChunkLocation {
                archive_index: record.chunk_index(),
                offset: record.entry_offset,
                length: record.entry_length,
                compression: if record.is_compressed() {
                    CompressionMethod::Zlib
                } else {
                    CompressionMethod::None
                },
            };

            let stored_length = if record.is_compressed() && record.entry_length > 0 {
                compression = CompressionMethod::Zlib;
                let (chunk, start) = source.locate(&location);
                readers.uncompressed_length(chunk, start)?
            } else {
                record.entry_length
            };

            if record.entry_length > 0 {
                let end = record.entry_offset as u64 + record.entry_length as u64;
                let used = source.chunks.entry(location.archive_index).or_insert(0);
                *used = (*used).max(end);
            }

            let md5 = md5_by_range
                .get(&(
                    location.archive_index as u32,
                    record.entry_offset,
                    record.entry_length,
                ))
                .copied();

            let length = (item.preload.len() as u32)
                .checked_add(stored_length)
                .ok_or_else(|| {
                    Error::invalid(
                        directory.header.size(),
                        format!("entry {} is longer than {} bytes", item.path, u32::MAX),
                    )
                })?;

            let entry = Entry {
                length,
                crc32: record.crc32,
                md5,
                options: EntryOptions {
                    preload_length: record.preload_length,
                    dedicated_chunk: false,
                },
                data: EntryData::Stored {
                    preload: item.preload,
                    location,
                },
            };

            tree.add_file(&item.path, entry).map_err(|e| match e {
                Error::PathConflict(p) => Error::invalid(
                    directory.header.size(),
                    format!("duplicate or conflicting entry {p}"),
                ),
                other => other,
            })?;
        }

        let has_chunks = source.chunks.keys().any(|&index| index != DIR_INDEX);
        let options = VpkOptions {
            version,
            chunk_size: DEFAULT_CHUNK_SIZE,
            single_file: !has_chunks && directory.embedded_size > 0,
            compression,
            generate_md5: !source.archive_md5.is_empty(),
            max_preload: u16::MAX,
        };

        info!(
            %version,
            entries = tree.len(),
            chunks = source.chunks.len(),
            "opened archive"
        );

        Ok(Self {
            options,
            tree,
            source: Some(source),
            dirty: false,
        })
    }

    /// The complete bytes of the file at `path`
    ///
    /// Preload bytes come from memory, the remainder is read from its chunk and decompressed if
    /// needed.
    #[instrument(skip(self), err)]
    pub fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .tree
            .get(path)
            .ok_or_else(|| EntryNotFoundError::Path(path.to_owned()))?;
        self.entry_bytes(entry)
    }

    pub(crate) fn entry_bytes(&self, entry: &Entry) -> Result<Vec<u8>> {
        match &entry.data {
            EntryData::Staged(bytes) => Ok(bytes.clone()),
            EntryData::Stored { preload, location } => {
                let stored = self.read_stored(location)?;
                let mut data = Vec::with_capacity(entry.length as usize);
                data.extend_from_slice(preload);
                data.extend(decode_payload(&stored, location.compression)?);
                Ok(data)
            }
        }
    }

    pub(crate) fn read_stored(&self, location: &ChunkLocation) -> Result<Vec<u8>> {
        if location.length == 0 {
            return Ok(Vec::new());
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| Error::CustomError("entry is not backed by any file".into()))?;
        debug!(
            index = location.archive_index,
            offset = location.offset,
            length = location.length,
            "reading stored payload"
        );
        source.read_stored(location)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use pretty_assertions::assert_eq;

    use crate::archive::{Archive, Version};
    use crate::error::{Error, Result};

    #[rustfmt::skip]
    const SINGLE_ENTRY_V1: [u8; 51] = [
        // header
        0x34, 0x12, 0xAA, 0x55,
        0x01, 0x00, 0x00, 0x00,
        0x24, 0x00, 0x00, 0x00,
        // tree: "txt" / " " / "readme"
        0x74, 0x78, 0x74, 0x00,
        0x20, 0x00,
        0x72, 0x65, 0x61, 0x64, 0x6D, 0x65, 0x00,
        0x14, 0x4C, 0x33, 0x0B,
        0x02, 0x00,
        0xFF, 0x7F,
        0x00, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00,
        0xFF, 0xFF,
        0x68, 0x69,
        0x00, 0x00, 0x00,
        // embedded data
        0x21, 0x21, 0x21,
    ];

    #[test]
    fn open_single_file_v1() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("single.vpk");
        fs::write(&path, SINGLE_ENTRY_V1)?;

        let archive = Archive::open(&path)?;
        assert_eq!(archive.options().version, Version::V1);
        assert!(archive.options().single_file);
        assert_eq!(archive.len(), 1);

        let entry = archive.entry("readme.txt").map(|e| (e.length(), e.preload().to_vec()));
        assert_eq!(entry, Some((5, b"hi".to_vec())));
        assert_eq!(archive.read_entry("README.TXT")?, b"hi!!!".to_vec());
        assert!(!archive.is_dirty());

        Ok(())
    }

    #[test]
    fn open_missing_file() {
        let result = Archive::open("/nonexistent/pak01_dir.vpk");
        assert!(matches!(result, Err(Error::FileAccess { .. })));
    }

    #[test]
    fn read_missing_entry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("single.vpk");
        fs::write(&path, SINGLE_ENTRY_V1)?;

        let archive = Archive::open(&path)?;
        assert!(matches!(
            archive.read_entry("missing.txt"),
            Err(Error::EntryNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn oversized_entry_length_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut file = SINGLE_ENTRY_V1.to_vec();
        file[31] = 0x00;
        file[32] = 0x00;
        file[37..41].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        file.truncate(48);
        fs::write(&path, file)?;

        assert!(matches!(
            Archive::open(&path),
            Err(Error::InvalidArchive { .. })
        ));

        Ok(())
    }

    #[test]
    fn missing_chunk_is_reported_on_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut file = SINGLE_ENTRY_V1.to_vec();
        // point the record at chunk 0, which does not exist
        file[31] = 0x00;
        file[32] = 0x00;
        file.truncate(48);
        fs::write(&path, file)?;

        let archive = Archive::open(&path)?;
        assert!(!archive.options().single_file);
        match archive.read_entry("readme.txt") {
            Err(Error::FileAccess { path, .. }) => {
                assert_eq!(path, dir.path().join("pak01_000.vpk"))
            }
            other => panic!("expected a file access error, got {other:?}"),
        }

        Ok(())
    }
}
