//! The archive façade tying the entry tree to the files on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bon::Builder;
use tracing::{debug, instrument, warn};

use crate::allocator::DEFAULT_CHUNK_SIZE;
use crate::compression::CompressionMethod;
use crate::entry::{ChunkLocation, Entry, EntryOptions};
use crate::error::{EntryNotFoundError, Error, Result};
use crate::tree::{Child, EntryTree};
use crate::types::{ArchiveMd5Record, OtherMd5Section, DIR_INDEX};

/// Layout version of the directory file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Version {
    /// Header, tree and data only
    V1 = 1,
    /// Adds checksum sections and payload compression
    #[default]
    V2 = 2,
}

impl TryFrom<u32> for Version {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Version::V1),
            2 => Ok(Version::V2),
            other => Err(Error::invalid(4, format!("unsupported version {other}"))),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

/// Options for how the archive is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct VpkOptions {
    /// Directory file layout
    #[builder(default)]
    pub version: Version,

    /// Packing threshold for chunk files, ignored in single-file mode
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Embed all entry data in the directory file
    #[builder(default)]
    pub single_file: bool,

    /// Compression applied to chunk payloads, version 2 only
    #[builder(default)]
    pub compression: CompressionMethod,

    /// Record an MD5 for every stored payload, version 2 only
    #[builder(default)]
    pub generate_md5: bool,

    /// Largest preload length accepted for an entry
    #[builder(default = u16::MAX)]
    pub max_preload: u16,
}

impl Default for VpkOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The files backing an archive that has been opened or saved
#[derive(Debug, Clone)]
pub(crate) struct ArchiveSource {
    pub path: PathBuf,
    pub data_offset: u64,
    pub chunks: BTreeMap<u16, u64>,
    pub archive_md5: Vec<ArchiveMd5Record>,
    pub other_md5: Option<OtherMd5Section>,
}

impl ArchiveSource {
    /// File and absolute offset holding a stored payload
    pub fn locate(&self, location: &ChunkLocation) -> (PathBuf, u64) {
        if location.archive_index == DIR_INDEX {
            (self.path.clone(), self.data_offset + location.offset as u64)
        } else {
            (
                chunk_path(&self.path, location.archive_index),
                location.offset as u64,
            )
        }
    }
}

/// Path of chunk `index` belonging to the directory file at `dir_path`
///
/// `pak01_dir.vpk` keeps its chunks in `pak01_000.vpk`, `pak01_001.vpk` and so on.
pub fn chunk_path(dir_path: &Path, index: u16) -> PathBuf {
    let stem = dir_path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let prefix = stem.strip_suffix("_dir").unwrap_or(&stem);
    let name = match dir_path.extension() {
        Some(ext) => format!("{prefix}_{index:03}.{}", ext.to_string_lossy()),
        None => format!("{prefix}_{index:03}"),
    };
    dir_path.with_file_name(name)
}

fn warn_unsupported(options: &VpkOptions) {
    if options.version == Version::V1 && options.compression != CompressionMethod::None {
        warn!("version 1 archives cannot compress payloads, entries will be stored raw");
    }
    if options.version == Version::V1 && options.generate_md5 {
        warn!("version 1 archives carry no checksum sections, MD5 generation is ignored");
    }
}

/// A VPK archive
///
/// Changes are kept in memory until [`Archive::save`] writes the directory file and its chunks.
///
/// ```no_run
/// # fn doit() -> vpkedit_vpk::error::Result<()> {
/// use vpkedit_vpk::{Archive, EntryOptions, VpkOptions};
///
/// let mut archive = Archive::create(VpkOptions::default());
/// archive.add_file("materials/foo.vmt", b"LightmappedGeneric".to_vec(), EntryOptions::default())?;
/// archive.save("pak01_dir.vpk")?;
///
/// let archive = Archive::open("pak01_dir.vpk")?;
/// assert_eq!(archive.read_entry("materials/foo.vmt")?, b"LightmappedGeneric");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Archive {
    pub(crate) options: VpkOptions,
    pub(crate) tree: EntryTree,
    pub(crate) source: Option<ArchiveSource>,
    pub(crate) dirty: bool,
}

impl Archive {
    /// Create an empty archive
    pub fn create(options: VpkOptions) -> Self {
        warn_unsupported(&options);
        Self {
            options,
            tree: EntryTree::new(),
            source: None,
            dirty: false,
        }
    }

    /// Options used the next time the archive is written
    pub fn options(&self) -> &VpkOptions {
        &self.options
    }

    /// Change the options used the next time the archive is written
    pub fn set_options(&mut self, options: VpkOptions) {
        warn_unsupported(&options);
        self.options = options;
        self.dirty = true;
    }

    /// Directory file the archive was last opened from or saved to
    pub fn path(&self) -> Option<&Path> {
        self.source.as_ref().map(|s| s.path.as_path())
    }

    /// Whether there are changes not yet written to disk
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn check_options(&self, options: &EntryOptions) -> Result<()> {
        if options.preload_length > self.options.max_preload {
            return Err(Error::InvalidEntryOptions(format!(
                "preload length {} exceeds the maximum of {}",
                options.preload_length, self.options.max_preload
            )));
        }
        Ok(())
    }

    /// Add a file, creating missing parent folders
    #[instrument(skip(self, data, options), err)]
    pub fn add_file(
        &mut self,
        path: &str,
        data: impl Into<Vec<u8>>,
        options: EntryOptions,
    ) -> Result<()> {
        let data = data.into();
        if data.len() as u64 > u32::MAX as u64 {
            return Err(Error::ChunkSizeExceeded {
                size: data.len() as u64,
                limit: u32::MAX as u64,
            });
        }
        self.check_options(&options)?;

        self.tree.add_file(path, Entry::staged(data, options))?;
        self.dirty = true;
        Ok(())
    }

    /// Add an empty folder
    ///
    /// Folders without files only exist in memory, the format has no way to store them.
    pub fn add_folder(&mut self, path: &str) -> Result<()> {
        self.tree.add_folder(path)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove a file, or a folder and everything below it
    #[instrument(skip(self), err)]
    pub fn remove_entry(&mut self, path: &str) -> Result<()> {
        let removed = self.tree.remove(path)?;
        debug!(removed, "removed entries");
        self.dirty = true;
        Ok(())
    }

    /// Move a file or folder to a new path
    #[instrument(skip(self), err)]
    pub fn rename_entry(&mut self, from: &str, to: &str) -> Result<()> {
        self.tree.rename(from, to)?;
        self.dirty = true;
        Ok(())
    }

    /// Change how a file is stored the next time the archive is written
    pub fn set_entry_options(&mut self, path: &str, options: EntryOptions) -> Result<()> {
        self.check_options(&options)?;
        let entry = self
            .tree
            .get_mut(path)
            .ok_or_else(|| EntryNotFoundError::Path(path.to_owned()))?;
        entry.options = options;
        self.dirty = true;
        Ok(())
    }

    /// The file at `path`
    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.tree.get(path)
    }

    /// Direct children of the folder at `path`, `""` being the root
    pub fn list_children(&self, path: &str) -> Result<Vec<Child<'_>>> {
        self.tree.children(path)
    }

    /// Every file with its path, ordered by path
    pub fn files(&self) -> impl Iterator<Item = (&str, &Entry)> + '_ {
        self.tree.files()
    }

    /// Number of files in the archive
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the archive holds no files
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Total size of the files when extracted
    pub fn total_size(&self) -> u64 {
        self.files().map(|(_, entry)| entry.length() as u64).sum()
    }

    /// Bytes used in each chunk as of the last open or save
    ///
    /// Data embedded in the directory file is listed under [`DIR_INDEX`].
    pub fn chunk_sizes(&self) -> BTreeMap<u16, u64> {
        self.source
            .as_ref()
            .map(|s| s.chunks.clone())
            .unwrap_or_default()
    }

    /// Discard the archive
    pub fn close(self) {
        if self.dirty {
            warn!(
                path = ?self.path(),
                entries = self.len(),
                "discarding unsaved changes"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{chunk_path, Archive, Version, VpkOptions};
    use crate::allocator::DEFAULT_CHUNK_SIZE;
    use crate::compression::CompressionMethod;
    use crate::entry::EntryOptions;
    use crate::error::{Error, Result};
    use crate::tree::Child;

    #[test]
    fn default_options() {
        let options = VpkOptions::default();
        assert_eq!(options.version, Version::V2);
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(options.max_preload, u16::MAX);
        assert!(!options.single_file);
        assert!(!options.generate_md5);
    }

    #[test]
    fn chunk_paths() {
        assert_eq!(
            chunk_path(Path::new("/game/pak01_dir.vpk"), 0),
            Path::new("/game/pak01_000.vpk")
        );
        assert_eq!(
            chunk_path(Path::new("custom.vpk"), 12),
            Path::new("custom_012.vpk")
        );
    }

    #[test]
    fn version_from_header_value() -> Result<()> {
        assert_eq!(Version::try_from(1)?, Version::V1);
        assert_eq!(Version::try_from(2)?, Version::V2);
        assert!(matches!(
            Version::try_from(3),
            Err(Error::InvalidArchive { .. })
        ));
        Ok(())
    }

    #[test]
    fn mutations_mark_archive_dirty() -> Result<()> {
        let mut archive = Archive::create(VpkOptions::default());
        assert!(!archive.is_dirty());

        archive.add_file("scripts/game.txt", b"hello".to_vec(), EntryOptions::default())?;
        assert!(archive.is_dirty());
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.total_size(), 5);
        assert!(archive.chunk_sizes().is_empty());

        let children = archive.list_children("scripts")?;
        assert!(matches!(children.as_slice(), [Child::File("game.txt", _)]));

        Ok(())
    }

    #[test]
    fn preload_cap_is_enforced() -> Result<()> {
        let mut archive = Archive::create(VpkOptions::builder().max_preload(16).build());

        let too_large = EntryOptions::builder().preload_length(17).build();
        assert!(matches!(
            archive.add_file("a.txt", b"data".to_vec(), too_large),
            Err(Error::InvalidEntryOptions(_))
        ));
        assert!(archive.is_empty());

        archive.add_file("a.txt", b"data".to_vec(), EntryOptions::default())?;
        assert!(matches!(
            archive.set_entry_options("a.txt", too_large),
            Err(Error::InvalidEntryOptions(_))
        ));

        let fits = EntryOptions::builder().preload_length(16).build();
        archive.set_entry_options("a.txt", fits)?;
        assert_eq!(archive.entry("a.txt").map(|e| e.options()), Some(fits));

        Ok(())
    }

    #[test]
    fn set_options_on_missing_entry() {
        let mut archive = Archive::create(VpkOptions::default());
        assert!(matches!(
            archive.set_entry_options("missing.txt", EntryOptions::default()),
            Err(Error::EntryNotFound(_))
        ));
    }

    #[test]
    fn failed_mutations_keep_state() -> Result<()> {
        let mut archive = Archive::create(VpkOptions::default());
        archive.add_file("a/b.txt", b"b".to_vec(), EntryOptions::default())?;

        assert!(archive.add_file("a/b.txt", b"x".to_vec(), EntryOptions::default()).is_err());
        assert!(archive.rename_entry("a/b.txt", "a").is_err());
        assert!(archive.remove_entry("a/c.txt").is_err());

        assert_eq!(
            archive.files().map(|(p, e)| (p, e.length())).collect::<Vec<_>>(),
            vec![("a/b.txt", 1)]
        );

        Ok(())
    }

    #[test]
    #[traced_test]
    fn closing_dirty_archive_warns() -> Result<()> {
        let mut archive = Archive::create(VpkOptions::default());
        archive.add_folder("empty")?;
        archive.close();

        assert!(logs_contain("discarding unsaved changes"));

        Ok(())
    }

    #[test]
    #[traced_test]
    fn version_one_options_warn_on_change() -> Result<()> {
        let mut archive = Archive::create(VpkOptions::default());
        assert!(!logs_contain("MD5 generation is ignored"));

        archive.set_options(
            VpkOptions::builder()
                .version(Version::V1)
                .generate_md5(true)
                .compression(CompressionMethod::Zlib)
                .build(),
        );
        assert!(logs_contain("MD5 generation is ignored"));
        assert!(logs_contain("entries will be stored raw"));
        assert!(archive.is_dirty());

        Ok(())
    }
}
