//! Reading and writing of the directory file's header, tree and trailer.
//!
//! The tree is three nested lists, each closed by an empty string:
//!
//! ```text
//! extension\0 { path\0 { name\0 record preload }* \0 }* \0 }* \0
//! ```
//!
//! An empty extension or path is stored as a single space.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::types::{
    ArchiveMd5Record, OtherMd5Section, VpkEntryRecord, VpkHeader, ARCHIVE_MD5_RECORD_SIZE,
    DIR_INDEX, ENTRY_RECORD_SIZE, ENTRY_TERMINATOR, OTHER_MD5_SECTION_SIZE, VPK_SIGNATURE,
};

const EMPTY_PLACEHOLDER: &str = " ";

/// One file record of the directory tree with its full path
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    /// Path of the file, `/` separated
    pub path: String,
    /// Location and checksum record
    pub record: VpkEntryRecord,
    /// Bytes stored inline after the record
    pub preload: Vec<u8>,
}

/// Everything stored in a directory file apart from embedded entry data
#[derive(Debug, Clone)]
pub struct DirectoryFile {
    /// File header
    pub header: VpkHeader,
    /// File records in the order they appear in the tree
    pub entries: Vec<DirectoryEntry>,
    /// Raw tree bytes
    pub tree: Vec<u8>,
    /// Start of the embedded data region
    pub data_offset: u64,
    /// Size of the embedded data region
    pub embedded_size: u64,
    /// Raw archive MD5 section, empty for version 1 files
    pub archive_md5_section: Vec<u8>,
    /// Parsed archive MD5 section
    pub archive_md5: Vec<ArchiveMd5Record>,
    /// Archive level checksums, if the file carries them
    pub other_md5: Option<OtherMd5Section>,
}

/// Split a path into the `(directory, name, extension)` triple stored in the tree
///
/// Missing directory or extension parts become the single space placeholder.
pub fn split_path(path: &str) -> (&str, &str, &str) {
    let (dir, file) = match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    };
    let (name, extension) = match file.rfind('.') {
        Some(i) if i > 0 && i + 1 < file.len() => (&file[..i], &file[i + 1..]),
        _ => (file, ""),
    };

    (or_placeholder(dir), name, or_placeholder(extension))
}

/// Reassemble a path from its tree parts
pub fn join_path(dir: &str, name: &str, extension: &str) -> String {
    let mut path = String::with_capacity(dir.len() + name.len() + extension.len() + 2);
    let dir = dir.trim_matches('/');
    if dir != EMPTY_PLACEHOLDER && !dir.is_empty() {
        path.push_str(dir);
        path.push('/');
    }
    path.push_str(name);
    if extension != EMPTY_PLACEHOLDER && !extension.is_empty() {
        path.push('.');
        path.push_str(extension);
    }
    path
}

fn or_placeholder(part: &str) -> &str {
    if part.is_empty() {
        EMPTY_PLACEHOLDER
    } else {
        part
    }
}

/// Sort key placing paths in the order the tree stores them
pub fn traversal_key(path: &str) -> (&str, &str, &str) {
    let (dir, name, extension) = split_path(path);
    (extension, dir, name)
}

struct TreeCursor<'a> {
    inner: Cursor<&'a [u8]>,
    base: u64,
}

impl<'a> TreeCursor<'a> {
    fn offset(&self) -> u64 {
        self.base + self.inner.position()
    }

    fn remaining(&self) -> u64 {
        self.inner.get_ref().len() as u64 - self.inner.position()
    }

    fn read_string(&mut self) -> Result<String> {
        let start = self.offset();
        let mut raw = Vec::new();
        loop {
            let byte = self
                .inner
                .read_u8()
                .map_err(|_| Error::invalid(start, "unterminated string in directory tree"))?;
            if byte == 0 {
                break;
            }
            raw.push(byte);
        }
        String::from_utf8(raw)
            .map_err(|_| Error::invalid(start, "directory tree string is not valid UTF-8"))
    }

    fn read_record(&mut self, version: u32) -> Result<VpkEntryRecord> {
        let start = self.offset();
        if self.remaining() < ENTRY_RECORD_SIZE {
            return Err(Error::invalid(start, "truncated file record"));
        }

        let record = VpkEntryRecord::read(&mut self.inner)?;
        if record.terminator != ENTRY_TERMINATOR {
            return Err(Error::invalid(
                start + ENTRY_RECORD_SIZE - 2,
                format!(
                    "expected record terminator {ENTRY_TERMINATOR:#06x}, found {:#06x}",
                    record.terminator
                ),
            ));
        }
        if version == 1 && record.is_compressed() {
            return Err(Error::invalid(
                start + 6,
                "compressed payloads are not supported by version 1 archives",
            ));
        }
        Ok(record)
    }

    fn read_preload(&mut self, length: u16) -> Result<Vec<u8>> {
        let start = self.offset();
        let mut preload = vec![0; length as usize];
        self.inner
            .read_exact(&mut preload)
            .map_err(|_| Error::invalid(start, "truncated preload data"))?;
        Ok(preload)
    }
}

/// Parse the tree bytes
///
/// `base` is the position of the tree in the directory file and only used for error offsets.
pub fn decode_tree(tree: &[u8], base: u64, version: u32) -> Result<Vec<DirectoryEntry>> {
    let mut cursor = TreeCursor {
        inner: Cursor::new(tree),
        base,
    };
    let mut entries = Vec::new();

    loop {
        let extension = cursor.read_string()?;
        if extension.is_empty() {
            break;
        }
        loop {
            let dir = cursor.read_string()?;
            if dir.is_empty() {
                break;
            }
            loop {
                let name = cursor.read_string()?;
                if name.is_empty() {
                    break;
                }
                let record = cursor.read_record(version)?;
                let preload = cursor.read_preload(record.preload_length)?;
                entries.push(DirectoryEntry {
                    path: join_path(&dir, &name, &extension),
                    record,
                    preload,
                });
            }
        }
    }

    if cursor.remaining() != 0 {
        return Err(Error::invalid(
            cursor.offset(),
            format!(
                "directory tree ends {} bytes before its declared size",
                cursor.remaining()
            ),
        ));
    }

    Ok(entries)
}

fn write_string(out: &mut Cursor<Vec<u8>>, value: &str) -> Result<()> {
    out.write_all(value.as_bytes())?;
    out.write_u8(0)?;
    Ok(())
}

/// Serialize entries into tree bytes, grouped by extension then directory
pub fn encode_tree(entries: &[DirectoryEntry]) -> Result<Vec<u8>> {
    let mut groups: BTreeMap<&str, BTreeMap<&str, Vec<(&str, &DirectoryEntry)>>> = BTreeMap::new();
    for entry in entries {
        let (dir, name, extension) = split_path(&entry.path);
        groups
            .entry(extension)
            .or_default()
            .entry(dir)
            .or_default()
            .push((name, entry));
    }

    let mut out = Cursor::new(Vec::new());
    for (extension, dirs) in groups {
        write_string(&mut out, extension)?;
        for (dir, mut files) in dirs {
            write_string(&mut out, dir)?;
            files.sort_by_key(|(name, _)| *name);
            for (name, entry) in files {
                debug_assert_eq!(entry.record.preload_length as usize, entry.preload.len());
                write_string(&mut out, name)?;
                entry.record.write(&mut out)?;
                out.write_all(&entry.preload)?;
            }
            out.write_u8(0)?;
        }
        out.write_u8(0)?;
    }
    out.write_u8(0)?;

    Ok(out.into_inner())
}

fn read_header<R: Read + Seek>(reader: &mut R) -> Result<VpkHeader> {
    let signature = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::invalid(0, "truncated header"))?;
    if signature != VPK_SIGNATURE {
        return Err(Error::invalid(
            0,
            format!("expected signature {VPK_SIGNATURE:#010x}, found {signature:#010x}"),
        ));
    }

    reader.seek(SeekFrom::Start(0))?;
    let header = VpkHeader::read(reader).map_err(|e| {
        if e.is_eof() {
            Error::invalid(0, "truncated header")
        } else {
            Error::from(e)
        }
    })?;

    if !(1..=2).contains(&header.version) {
        return Err(Error::invalid(
            4,
            format!("unsupported version {}", header.version),
        ));
    }
    Ok(header)
}

/// Read and validate the directory file
#[instrument(skip_all, err)]
pub fn read_directory<R: Read + Seek>(reader: &mut R) -> Result<DirectoryFile> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let header = read_header(reader)?;
    let tree_start = header.size();
    let data_offset = tree_start + header.tree_size as u64;
    if data_offset > file_len {
        return Err(Error::invalid(
            tree_start,
            format!(
                "directory tree of {} bytes extends past the end of the file",
                header.tree_size
            ),
        ));
    }

    let mut tree = vec![0; header.tree_size as usize];
    reader.read_exact(&mut tree)?;
    let entries = decode_tree(&tree, tree_start, header.version)?;

    let mut directory = DirectoryFile {
        header,
        entries,
        tree,
        data_offset,
        embedded_size: file_len - data_offset,
        archive_md5_section: Vec::new(),
        archive_md5: Vec::new(),
        other_md5: None,
    };

    if let Some(extended) = header.extended {
        let md5_start = data_offset + extended.file_data_section_size as u64;
        let end = md5_start
            + extended.archive_md5_section_size as u64
            + extended.other_md5_section_size as u64
            + extended.signature_section_size as u64;
        if end > file_len {
            return Err(Error::invalid(
                8,
                format!("declared sections need {end} bytes but the file has {file_len}"),
            ));
        }
        directory.embedded_size = extended.file_data_section_size as u64;

        let md5_size = extended.archive_md5_section_size as u64;
        if md5_size % ARCHIVE_MD5_RECORD_SIZE != 0 {
            return Err(Error::invalid(
                md5_start,
                format!("archive MD5 section size {md5_size} is not a multiple of {ARCHIVE_MD5_RECORD_SIZE}"),
            ));
        }

        reader.seek(SeekFrom::Start(md5_start))?;
        let mut section = vec![0; md5_size as usize];
        reader.read_exact(&mut section)?;
        let mut records = Cursor::new(section.as_slice());
        for _ in 0..md5_size / ARCHIVE_MD5_RECORD_SIZE {
            directory
                .archive_md5
                .push(ArchiveMd5Record::read(&mut records)?);
        }
        directory.archive_md5_section = section;

        match extended.other_md5_section_size as u64 {
            0 => {}
            OTHER_MD5_SECTION_SIZE => {
                directory.other_md5 = Some(OtherMd5Section::read(reader)?);
            }
            size => {
                return Err(Error::invalid(
                    md5_start + md5_size,
                    format!("unexpected checksum section size {size}"),
                ))
            }
        }

        if extended.signature_section_size > 0 {
            debug!(
                size = extended.signature_section_size,
                "skipping signature section"
            );
        }
    }

    for entry in &directory.entries {
        let record = &entry.record;
        if record.chunk_index() == DIR_INDEX
            && record.entry_offset as u64 + record.entry_length as u64 > directory.embedded_size
        {
            return Err(Error::invalid(
                directory.data_offset,
                format!("embedded data of {} lies outside the file", entry.path),
            ));
        }
    }

    debug!(
        version = directory.header.version,
        entries = directory.entries.len(),
        tree_size = directory.header.tree_size,
        "read directory"
    );

    Ok(directory)
}
