//! Writing archives to disk
//!
//! Every save rebuilds the directory and all chunks. Output goes to temporary files next to the
//! destination which only replace the previous files once everything has been written.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use binrw::BinWrite;
use md5::{Digest, Md5};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, instrument, warn};

use crate::allocator::{ensure_single_file_fits, ChunkAllocator};
use crate::archive::{chunk_path, Archive, ArchiveSource, Version};
use crate::checksum::{self, archive_checksums};
use crate::compression::{encode_payload, CompressionMethod};
use crate::directory::{encode_tree, traversal_key, DirectoryEntry};
use crate::entry::{ChunkLocation, Entry, EntryData};
use crate::error::{Error, Result};
use crate::progress::{NoProgress, ProgressReporter};
use crate::tree::NodeId;
use crate::types::{
    ArchiveMd5Record, VpkEntryRecord, VpkHeader, VpkHeaderV2, COMPRESSED_FLAG, DIR_INDEX,
    HEADER_V1_SIZE, HEADER_V2_SIZE, OTHER_MD5_SECTION_SIZE,
};

/// Payload bytes staged for one chunk or the embedded region
struct StagedChunk<W: Write> {
    writer: BufWriter<W>,
    hasher: Md5,
}

impl<W: Write> StagedChunk<W> {
    fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
            hasher: Md5::new(),
        }
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.hasher.update(data);
        self.writer.write_all(data)
    }

    fn finish(self) -> io::Result<(W, [u8; 16])> {
        let inner = self.writer.into_inner().map_err(|e| e.into_error())?;
        Ok((inner, self.hasher.finalize().into()))
    }
}

/// The outcome of laying out every entry
struct Layout {
    records: Vec<DirectoryEntry>,
    updates: Vec<(NodeId, Entry)>,
    archive_md5: Vec<ArchiveMd5Record>,
    chunks: BTreeMap<u16, StagedChunk<NamedTempFile>>,
    embedded: Option<StagedChunk<File>>,
    chunk_sizes: BTreeMap<u16, u64>,
}

/// Chunk files overwritten by a save
///
/// The previous files are moved aside and only deleted once the new directory file is in place,
/// so a failed save can put them back.
#[derive(Default)]
struct ReplacedChunks {
    backups: Vec<(PathBuf, TempPath)>,
    created: Vec<PathBuf>,
}

impl ReplacedChunks {
    fn replace(&mut self, file: NamedTempFile, target: &Path, dir: &Path) -> Result<()> {
        let had_previous = fs::symlink_metadata(target).is_ok_and(|m| m.is_file());
        if had_previous {
            let backup = NamedTempFile::new_in(dir)
                .map_err(temp_error(dir))?
                .into_temp_path();
            fs::rename(target, &backup).map_err(Error::file_access(target))?;
            self.backups.push((target.to_path_buf(), backup));
        }

        file.persist(target).map_err(|e| Error::FileAccess {
            path: target.to_path_buf(),
            source: e.error,
        })?;
        if !had_previous {
            self.created.push(target.to_path_buf());
        }
        Ok(())
    }

    fn restore(self) {
        for path in &self.created {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "unable to remove new chunk");
            }
        }
        for (target, backup) in self.backups.into_iter().rev() {
            match fs::rename(&backup, &target) {
                Ok(()) => debug!(path = %target.display(), "restored previous chunk"),
                Err(e) => warn!(path = %target.display(), error = %e, "unable to restore previous chunk"),
            }
        }
    }

    fn commit(self) {
        for (target, backup) in self.backups {
            if let Err(e) = backup.close() {
                warn!(path = %target.display(), error = %e, "unable to remove previous chunk");
            }
        }
    }
}

fn temp_error(dir: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::FileAccess {
        path: dir.to_path_buf(),
        source,
    }
}

impl Archive {
    /// Write the archive to `path`, replacing any existing file
    ///
    /// For multi-chunk archives `path` names the directory file and the chunks are written next
    /// to it, see [`crate::archive::chunk_path`].
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.save_with_progress(path, &mut NoProgress)
    }

    /// Write the archive to `path`, reporting every written entry
    ///
    /// When the reporter cancels, the temporary files are removed and the files on disk are left
    /// as they were.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn save_with_progress(
        &mut self,
        path: impl AsRef<Path>,
        progress: &mut dyn ProgressReporter,
    ) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let layout = self.layout(&dir, progress)?;
        let Layout {
            records,
            updates,
            archive_md5,
            chunks,
            embedded,
            chunk_sizes,
        } = layout;

        let tree = encode_tree(&records)?;
        let tree_size = u32::try_from(tree.len()).map_err(|_| Error::ChunkSizeExceeded {
            size: tree.len() as u64,
            limit: u32::MAX as u64,
        })?;
        let embedded_size = chunk_sizes.get(&DIR_INDEX).copied().unwrap_or(0);
        let version = self.options.version;

        let mut md5_section = Cursor::new(Vec::new());
        for record in &archive_md5 {
            record.write(&mut md5_section)?;
        }
        let md5_section = md5_section.into_inner();

        let (header_size, trailer_size) = match version {
            Version::V1 => (HEADER_V1_SIZE, 0),
            Version::V2 => (
                HEADER_V2_SIZE,
                md5_section.len() as u64 + OTHER_MD5_SECTION_SIZE,
            ),
        };
        let total = header_size + tree.len() as u64 + embedded_size + trailer_size;
        if self.options.single_file {
            ensure_single_file_fits(total)?;
        } else if embedded_size > u32::MAX as u64 {
            return Err(Error::ChunkSizeExceeded {
                size: embedded_size,
                limit: u32::MAX as u64,
            });
        }

        let mut chunk_checksums = BTreeMap::new();
        let mut chunk_files = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks {
            let (file, checksum) = chunk.finish().map_err(temp_error(&dir))?;
            file.as_file().sync_all().map_err(temp_error(&dir))?;
            chunk_checksums.insert(index, checksum);
            chunk_files.push((index, file));
        }
        let embedded = match embedded {
            Some(chunk) => {
                let (file, checksum) = chunk.finish().map_err(temp_error(&dir))?;
                chunk_checksums.insert(DIR_INDEX, checksum);
                Some(file)
            }
            None => None,
        };

        let header = VpkHeader {
            version: version as u32,
            tree_size,
            extended: match version {
                Version::V1 => None,
                Version::V2 => Some(VpkHeaderV2 {
                    file_data_section_size: embedded_size as u32,
                    archive_md5_section_size: md5_section.len() as u32,
                    other_md5_section_size: OTHER_MD5_SECTION_SIZE as u32,
                    signature_section_size: 0,
                }),
            },
        };
        let other_md5 = match version {
            Version::V1 => None,
            Version::V2 => Some(archive_checksums(
                &tree,
                &md5_section,
                chunk_checksums.values().copied(),
            )),
        };

        let mut head = Cursor::new(Vec::with_capacity(header_size as usize));
        header.write(&mut head)?;

        let temp = NamedTempFile::new_in(&dir).map_err(temp_error(&dir))?;
        let mut writer = BufWriter::new(temp);
        writer.write_all(head.get_ref())?;
        writer.write_all(&tree)?;
        if let Some(mut embedded) = embedded {
            embedded.seek(SeekFrom::Start(0))?;
            io::copy(&mut embedded, &mut writer)?;
        }
        if let Some(other_md5) = &other_md5 {
            writer.write_all(&md5_section)?;
            let mut trailer = Cursor::new(Vec::with_capacity(OTHER_MD5_SECTION_SIZE as usize));
            other_md5.write(&mut trailer)?;
            writer.write_all(trailer.get_ref())?;
        }
        let temp = writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all().map_err(temp_error(&dir))?;

        let mut replaced = ReplacedChunks::default();
        let committed = chunk_files
            .into_iter()
            .try_for_each(|(index, file)| replaced.replace(file, &chunk_path(path, index), &dir))
            .and_then(|()| {
                temp.persist(path).map_err(|e| Error::FileAccess {
                    path: path.to_path_buf(),
                    source: e.error,
                })
            });
        if let Err(e) = committed {
            replaced.restore();
            return Err(e);
        }
        replaced.commit();

        self.remove_stale_chunks(path, &chunk_sizes);

        for (id, entry) in updates {
            if let Some(slot) = self.tree.entry_mut(id) {
                *slot = entry;
            }
        }
        self.source = Some(ArchiveSource {
            path: path.to_path_buf(),
            data_offset: header_size + tree.len() as u64,
            chunks: chunk_sizes,
            archive_md5,
            other_md5,
        });
        self.dirty = false;

        info!(
            %version,
            entries = self.tree.len(),
            chunks = self.source.as_ref().map(|s| s.chunks.len()).unwrap_or(0),
            size = total,
            "saved archive"
        );

        Ok(())
    }

    /// Stage every entry's payload and build its record
    fn layout(&self, dir: &Path, progress: &mut dyn ProgressReporter) -> Result<Layout> {
        let version = self.options.version;
        let compression = match version {
            Version::V1 => CompressionMethod::None,
            Version::V2 => self.options.compression,
        };
        let generate_md5 = version == Version::V2 && self.options.generate_md5;
        let mut allocator = if self.options.single_file {
            ChunkAllocator::single_file()
        } else {
            ChunkAllocator::multi_chunk(self.options.chunk_size)
        };

        let mut order: Vec<(NodeId, &str)> = self.tree.file_ids().collect();
        order.sort_by(|a, b| traversal_key(a.1).cmp(&traversal_key(b.1)));
        progress.on_total(order.len());

        let mut layout = Layout {
            records: Vec::with_capacity(order.len()),
            updates: Vec::with_capacity(order.len()),
            archive_md5: Vec::new(),
            chunks: BTreeMap::new(),
            embedded: None,
            chunk_sizes: BTreeMap::new(),
        };

        for (done, (id, path)) in order.into_iter().enumerate() {
            let Some(entry) = self.tree.entry(id) else {
                continue;
            };
            let data = self.entry_bytes(entry)?;
            let crc32 = checksum::crc32(&data);
            if !entry.is_staged() && crc32 != entry.crc32 {
                warn!(path, "entry does not match its recorded checksum, recording the new one");
            }

            let preload_length = (entry.options.preload_length as usize).min(data.len());
            let (preload, rest) = data.split_at(preload_length);

            let (stored, method): (Cow<[u8]>, _) = match compression {
                CompressionMethod::Zlib if !rest.is_empty() => {
                    let compressed = encode_payload(rest)?;
                    if compressed.len() < rest.len() {
                        (Cow::Owned(compressed), CompressionMethod::Zlib)
                    } else {
                        (Cow::Borrowed(rest), CompressionMethod::None)
                    }
                }
                _ => (Cow::Borrowed(rest), CompressionMethod::None),
            };

            let slot = allocator.allocate(stored.len() as u64, entry.options.dedicated_chunk)?;
            if !stored.is_empty() {
                if slot.archive_index == DIR_INDEX {
                    if layout.embedded.is_none() {
                        let spool = tempfile::tempfile_in(dir).map_err(temp_error(dir))?;
                        layout.embedded = Some(StagedChunk::new(spool));
                    }
                    if let Some(chunk) = &mut layout.embedded {
                        chunk.append(&stored).map_err(temp_error(dir))?;
                    }
                } else {
                    let chunk = match layout.chunks.entry(slot.archive_index) {
                        std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                        std::collections::btree_map::Entry::Vacant(e) => e.insert(
                            StagedChunk::new(NamedTempFile::new_in(dir).map_err(temp_error(dir))?),
                        ),
                    };
                    chunk.append(&stored).map_err(temp_error(dir))?;
                }
            }

            let md5 = (generate_md5 && !stored.is_empty()).then(|| checksum::md5(&stored));
            if let Some(checksum) = md5 {
                layout.archive_md5.push(ArchiveMd5Record {
                    archive_index: slot.archive_index as u32,
                    offset: slot.offset,
                    length: stored.len() as u32,
                    checksum,
                });
            }

            let location = ChunkLocation {
                archive_index: slot.archive_index,
                offset: slot.offset,
                length: stored.len() as u32,
                compression: method,
            };
            let flag = if method == CompressionMethod::Zlib {
                COMPRESSED_FLAG
            } else {
                0
            };

            layout.records.push(DirectoryEntry {
                path: path.to_owned(),
                record: VpkEntryRecord {
                    crc32,
                    preload_length: preload_length as u16,
                    archive_index: slot.archive_index | flag,
                    entry_offset: slot.offset,
                    entry_length: stored.len() as u32,
                    ..Default::default()
                },
                preload: preload.to_vec(),
            });
            layout.updates.push((
                id,
                Entry {
                    length: data.len() as u32,
                    crc32,
                    md5,
                    options: entry.options,
                    data: EntryData::Stored {
                        preload: preload.to_vec(),
                        location,
                    },
                },
            ));

            if !progress.on_entry(path, done + 1) {
                debug!(path, "save cancelled");
                return Err(Error::Cancelled);
            }
        }

        layout.chunk_sizes = allocator.chunks().clone();
        Ok(layout)
    }

    /// Delete chunk files of the previous layout that the new one no longer uses
    fn remove_stale_chunks(&self, path: &Path, chunks: &BTreeMap<u16, u64>) {
        let Some(previous) = &self.source else {
            return;
        };
        if previous.path != path {
            return;
        }

        for index in previous.chunks.keys() {
            if *index == DIR_INDEX || chunks.contains_key(index) {
                continue;
            }
            let stale = chunk_path(path, *index);
            match fs::remove_file(&stale) {
                Ok(()) => debug!(path = %stale.display(), "removed stale chunk"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %stale.display(), error = %e, "unable to remove stale chunk"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::archive::{chunk_path, Archive, Version, VpkOptions};
    use crate::checksum;
    use crate::compression::CompressionMethod;
    use crate::entry::EntryOptions;
    use crate::error::{Error, Result};
    use crate::types::DIR_INDEX;

    #[test]
    fn writes_expected_single_file_v1_bytes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("single.vpk");

        let mut archive = Archive::create(
            VpkOptions::builder()
                .version(Version::V1)
                .single_file(true)
                .build(),
        );
        archive.add_file(
            "readme.txt",
            b"hi!!!".to_vec(),
            EntryOptions::builder().preload_length(2).build(),
        )?;
        archive.save(&path)?;

        let crc = checksum::crc32(b"hi!!!").to_le_bytes();
        #[rustfmt::skip]
        let expected = vec![
            0x34, 0x12, 0xAA, 0x55,
            0x01, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x74, 0x78, 0x74, 0x00,
            0x20, 0x00,
            0x72, 0x65, 0x61, 0x64, 0x6D, 0x65, 0x00,
            crc[0], crc[1], crc[2], crc[3],
            0x02, 0x00,
            0xFF, 0x7F,
            0x00, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
            0xFF, 0xFF,
            0x68, 0x69,
            0x00, 0x00, 0x00,
            0x21, 0x21, 0x21,
        ];
        assert_eq!(fs::read(&path)?, expected);
        assert!(!archive.is_dirty());

        Ok(())
    }

    #[test]
    fn multi_chunk_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut archive = Archive::create(VpkOptions::builder().chunk_size(8).build());
        archive.add_file("a.bin", vec![1u8; 6], EntryOptions::default())?;
        archive.add_file("b.bin", vec![2u8; 6], EntryOptions::default())?;
        archive.add_file("c.bin", vec![3u8; 1], EntryOptions::default())?;
        archive.save(&path)?;

        assert_eq!(fs::read(chunk_path(&path, 0))?, vec![1; 6]);
        assert_eq!(fs::read(chunk_path(&path, 1))?, vec![2, 2, 2, 2, 2, 2, 3]);
        assert_eq!(
            archive.chunk_sizes().into_iter().collect::<Vec<_>>(),
            vec![(0, 6), (1, 7)]
        );
        let location = archive.entry("c.bin").and_then(|e| e.location().copied());
        assert_eq!(location.map(|l| (l.archive_index, l.offset)), Some((1, 6)));

        Ok(())
    }

    #[test]
    fn fully_preloaded_entries_use_no_chunk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut archive = Archive::create(VpkOptions::default());
        archive.add_file(
            "tiny.txt",
            b"tiny".to_vec(),
            EntryOptions::builder().preload_length(64).build(),
        )?;
        archive.add_file("empty.txt", Vec::new(), EntryOptions::default())?;
        archive.save(&path)?;

        assert!(archive.chunk_sizes().is_empty());
        assert!(!chunk_path(&path, 0).exists());
        let location = archive.entry("tiny.txt").and_then(|e| e.location().copied());
        assert_eq!(
            location.map(|l| (l.archive_index, l.offset, l.length)),
            Some((DIR_INDEX, 0, 0))
        );
        assert_eq!(archive.read_entry("empty.txt")?, Vec::<u8>::new());

        Ok(())
    }

    #[test]
    fn incompressible_payload_is_stored_raw() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut archive = Archive::create(
            VpkOptions::builder()
                .compression(CompressionMethod::Zlib)
                .build(),
        );
        archive.add_file("noise.bin", vec![0x5Au8, 0x01, 0xC3], EntryOptions::default())?;
        archive.add_file("zeros.bin", vec![0u8; 4096], EntryOptions::default())?;
        archive.save(&path)?;

        assert!(!archive.entry("noise.bin").is_some_and(|e| e.is_compressed()));
        assert!(archive.entry("zeros.bin").is_some_and(|e| e.is_compressed()));
        assert_eq!(archive.read_entry("zeros.bin")?, vec![0; 4096]);

        Ok(())
    }

    #[test]
    fn version_1_never_compresses() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut archive = Archive::create(
            VpkOptions::builder()
                .version(Version::V1)
                .compression(CompressionMethod::Zlib)
                .build(),
        );
        archive.add_file("zeros.bin", vec![0u8; 4096], EntryOptions::default())?;
        archive.save(&path)?;

        assert!(!archive.entry("zeros.bin").is_some_and(|e| e.is_compressed()));
        assert_eq!(fs::read(chunk_path(&path, 0))?.len(), 4096);

        Ok(())
    }

    #[test]
    #[traced_test]
    fn cancelled_save_leaves_previous_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut archive = Archive::create(VpkOptions::default());
        archive.add_file("a.txt", b"first".to_vec(), EntryOptions::default())?;
        archive.save(&path)?;
        let before = fs::read(&path)?;

        archive.add_file("b.txt", b"second".to_vec(), EntryOptions::default())?;
        let result = archive.save_with_progress(&path, &mut |_: &str, done: usize| done < 1);
        assert!(matches!(result, Err(Error::Cancelled)));

        assert_eq!(fs::read(&path)?, before);
        assert!(archive.is_dirty());
        let leftovers = fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 2);

        Ok(())
    }

    #[test]
    #[traced_test]
    fn failed_save_in_place_keeps_previous_archive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");
        let options = VpkOptions::builder().chunk_size(100).build();

        let mut archive = Archive::create(options);
        archive.add_file("m/b.bin", vec![0xBBu8; 60], EntryOptions::default())?;
        archive.save(&path)?;
        let directory = fs::read(&path)?;
        let chunk = fs::read(chunk_path(&path, 0))?;

        // a folder in place of the second chunk makes its rename fail
        let blocker = chunk_path(&path, 1);
        fs::create_dir(&blocker)?;
        fs::write(blocker.join("keep"), b"x")?;

        archive.add_file("m/a.bin", vec![0xAAu8; 60], EntryOptions::default())?;
        let result = archive.save(&path);
        assert!(matches!(result, Err(Error::FileAccess { path, .. }) if path == blocker));
        assert!(archive.is_dirty());

        assert_eq!(fs::read(&path)?, directory);
        assert_eq!(fs::read(chunk_path(&path, 0))?, chunk);
        assert_eq!(fs::read_dir(dir.path())?.count(), 3);

        let reopened = Archive::open(&path)?;
        assert_eq!(reopened.read_entry("m/b.bin")?, vec![0xBBu8; 60]);
        assert!(reopened.verify().passed());
        assert_eq!(archive.read_entry("m/b.bin")?, vec![0xBBu8; 60]);

        Ok(())
    }

    #[test]
    fn shrinking_archive_removes_stale_chunks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pak01_dir.vpk");

        let mut archive = Archive::create(VpkOptions::builder().chunk_size(4).build());
        archive.add_file("a.bin", vec![1u8; 4], EntryOptions::default())?;
        archive.add_file("b.bin", vec![2u8; 4], EntryOptions::default())?;
        archive.save(&path)?;
        assert!(chunk_path(&path, 1).exists());

        archive.remove_entry("b.bin")?;
        archive.save(&path)?;
        assert!(chunk_path(&path, 0).exists());
        assert!(!chunk_path(&path, 1).exists());

        Ok(())
    }
}
