//! Entry and archive checksums.
//!
//! Every entry carries a CRC32 of its uncompressed bytes. When MD5 generation is enabled, version 2
//! archives also record an MD5 of every stored payload range. The archive level checksum is
//!
//! ```text
//! MD5(tree_checksum || archive_md5_section_checksum || MD5(chunk) for every chunk, ascending index)
//! ```
//!
//! where data embedded in the directory file counts as chunk `0x7FFF`.

use crc::{Crc, CRC_32_ISO_HDLC};
use md5::{Digest, Md5};

use crate::types::OtherMd5Section;

/// The IEEE CRC32 used for entry checksums
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC32 of `data`
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// MD5 of `data`
pub fn md5(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// Combine the directory checksums and per chunk checksums into the trailer section
pub fn archive_checksums(
    tree: &[u8],
    archive_md5_section: &[u8],
    chunk_checksums: impl IntoIterator<Item = [u8; 16]>,
) -> OtherMd5Section {
    let tree_checksum = md5(tree);
    let archive_md5_section_checksum = md5(archive_md5_section);

    let mut hasher = Md5::new();
    hasher.update(tree_checksum);
    hasher.update(archive_md5_section_checksum);
    for checksum in chunk_checksums {
        hasher.update(checksum);
    }

    OtherMd5Section {
        tree_checksum,
        archive_md5_section_checksum,
        archive_checksum: hasher.finalize().into(),
    }
}

/// Lowercase hex rendering of a digest
pub fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{archive_checksums, crc32, md5, to_hex};

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn md5_of_empty_input() {
        assert_eq!(to_hex(&md5(b"")), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn archive_checksum_is_stable() {
        let first = archive_checksums(b"tree", b"", [md5(b"chunk0"), md5(b"chunk1")]);
        let second = archive_checksums(b"tree", b"", [md5(b"chunk0"), md5(b"chunk1")]);
        assert_eq!(first, second);
        assert_eq!(first.tree_checksum, md5(b"tree"));
        assert_eq!(first.archive_md5_section_checksum, md5(b""));
    }

    #[test]
    fn archive_checksum_covers_chunks() {
        let original = archive_checksums(b"tree", b"", [md5(b"chunk0")]);
        let tampered = archive_checksums(b"tree", b"", [md5(b"chunk1")]);
        assert_eq!(original.tree_checksum, tampered.tree_checksum);
        assert_ne!(original.archive_checksum, tampered.archive_checksum);
    }
}
