//! This library handles reading, editing and creating **VPK** pack archives used by Source engine games.
//!
//! # VPK Archive Format Documentation
//!
//! A VPK archive is a directory file, usually named `<name>_dir.vpk`, listing every file in the
//! archive, plus zero or more numbered chunk files (`<name>_000.vpk`, `<name>_001.vpk`, ...)
//! holding the file contents. In single-file mode the contents are embedded in the directory file
//! right after the tree instead.
//!
//! ## File Structure
//!
//! The directory file consists of a header, the directory tree, embedded file data and, for
//! version 2, a trailer of checksum sections.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Signature              | 4 bytes: 0x55AA1234                                        |
//! | 0x0004         | Version                | 4 bytes: 1 or 2                                            |
//! | 0x0008         | Tree Size              | 4 bytes: Size of the directory tree                        |
//! | 0x000C         | File Data Size         | 4 bytes (v2): Size of the embedded file data               |
//! | 0x0010         | Archive MD5 Size       | 4 bytes (v2): Size of the archive MD5 section              |
//! | 0x0014         | Other MD5 Size         | 4 bytes (v2): Size of the other MD5 section, always 48     |
//! | 0x0018         | Signature Size         | 4 bytes (v2): Size of the signature section                |
//!
//! ### Directory Tree
//!
//! Files are grouped by extension, then by directory. Every level is a list of NUL terminated
//! strings closed by an empty string. A missing extension or directory is written as a single
//! space.
//!
//! ```text
//! extension\0 { path\0 { name\0 record preload }* \0 }* \0 }* \0
//! ```
//!
//! Every file name is followed by this record:
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | CRC32                  | 4 bytes: CRC-32 checksum of the uncompressed file       |
//! | 0x0004         | Preload Length         | 2 bytes: Bytes stored inline right after the record     |
//! | 0x0006         | Archive Index          | 2 bytes: Chunk holding the remaining bytes              |
//! | 0x0008         | Entry Offset           | 4 bytes: Offset of the remaining bytes in the chunk     |
//! | 0x000C         | Entry Length           | 4 bytes: Number of remaining bytes stored in the chunk  |
//! | 0x0010         | Terminator             | 2 bytes: Always 0xFFFF                                  |
//!
//! - **Archive Index**: `0x7FFF` means the bytes are embedded in the directory file, with the
//!   offset counted from the end of the tree. In version 2 archives the bit `0x8000` marks a
//!   compressed payload: the uncompressed length as a 4 byte integer followed by a zlib stream.
//!
//! ### Checksum Sections
//!
//! Version 2 archives end with an archive MD5 section, holding one 28 byte record
//! (`archive index, offset, length, md5`) per stored payload when MD5 generation is enabled, and
//! a 48 byte section with the MD5 of the tree, the MD5 of the archive MD5 section and an
//! aggregate checksum. See [`checksum`] for how the aggregate is built.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.vpk`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Paths**: `/` separated and lower case
//!

pub mod allocator;
pub mod archive;
pub mod checksum;
pub mod compression;
pub mod directory;
pub mod entry;
pub mod error;
pub mod extract;
pub mod progress;
pub mod read;
pub mod tree;
pub mod types;
pub mod verify;
pub mod worker;
pub mod write;

pub use archive::{Archive, Version, VpkOptions};
pub use compression::CompressionMethod;
pub use entry::{Entry, EntryOptions};
pub use extract::{ExtractOptions, ExtractReport};
pub use verify::VerificationReport;
