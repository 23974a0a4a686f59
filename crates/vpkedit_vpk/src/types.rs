//! Base types for structure of VPK files.

use binrw::{BinRead, BinWrite};

/// Signature found at the start of every VPK directory file
pub const VPK_SIGNATURE: u32 = 0x55AA_1234;

/// Value closing every file record in the directory tree
pub const ENTRY_TERMINATOR: u16 = 0xFFFF;

/// Archive index of data embedded in the directory file itself
pub const DIR_INDEX: u16 = 0x7FFF;

/// Archive index bit flagging a zlib compressed payload
pub const COMPRESSED_FLAG: u16 = 0x8000;

/// Size of a version 1 header
pub const HEADER_V1_SIZE: u64 = 12;

/// Size of a version 2 header
pub const HEADER_V2_SIZE: u64 = 28;

/// Size of a [`VpkEntryRecord`] on disk
pub const ENTRY_RECORD_SIZE: u64 = 18;

/// Size of an [`ArchiveMd5Record`] on disk
pub const ARCHIVE_MD5_RECORD_SIZE: u64 = 28;

/// Size of the [`OtherMd5Section`] on disk
pub const OTHER_MD5_SECTION_SIZE: u64 = 48;

/// VPK directory file header
///
/// Always starts with the signature `0x55AA1234` followed by the version. Version 2 files carry
/// the sizes of the sections that follow the directory tree.
/// All data is stored in little endian format
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = 0x55AA1234u32, little)]
pub struct VpkHeader {
    /// Format version, either 1 or 2
    pub version: u32,

    /// The size of the directory tree following the header
    pub tree_size: u32,

    /// Section sizes only present in version 2
    #[br(if(version == 2))]
    pub extended: Option<VpkHeaderV2>,
}

impl VpkHeader {
    /// Size in bytes of this header on disk
    pub fn size(&self) -> u64 {
        match self.extended {
            Some(_) => HEADER_V2_SIZE,
            None => HEADER_V1_SIZE,
        }
    }
}

/// Additional header fields of version 2 files
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct VpkHeaderV2 {
    /// Bytes of entry data embedded in the directory file after the tree
    pub file_data_section_size: u32,

    /// Size of the section holding one MD5 record per stored payload
    pub archive_md5_section_size: u32,

    /// Size of the section holding the tree, section and archive checksums
    pub other_md5_section_size: u32,

    /// Size of the public key and signature section
    pub signature_section_size: u32,
}

/// VPK file record
///
/// Defines an entry in the directory tree. Preload bytes follow it inline.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct VpkEntryRecord {
    /// A [`crc::CRC_32_ISO_HDLC`] checksum of the entry's uncompressed bytes
    pub crc32: u32,

    /// Number of bytes stored inline after this record
    pub preload_length: u16,

    /// The chunk holding the remaining bytes, possibly with [`COMPRESSED_FLAG`] set
    pub archive_index: u16,

    /// Offset of the remaining bytes inside the chunk
    pub entry_offset: u32,

    /// Number of bytes stored inside the chunk
    pub entry_length: u32,

    /// Always [`ENTRY_TERMINATOR`]
    pub terminator: u16,
}

impl Default for VpkEntryRecord {
    fn default() -> Self {
        Self {
            crc32: 0,
            preload_length: 0,
            archive_index: DIR_INDEX,
            entry_offset: 0,
            entry_length: 0,
            terminator: ENTRY_TERMINATOR,
        }
    }
}

impl VpkEntryRecord {
    /// Archive index with the compression flag removed
    pub fn chunk_index(&self) -> u16 {
        self.archive_index & !COMPRESSED_FLAG
    }

    /// Whether the stored payload is zlib compressed
    pub fn is_compressed(&self) -> bool {
        self.archive_index & COMPRESSED_FLAG != 0
    }
}

/// Checksum of one stored payload range, kept in the version 2 trailer
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct ArchiveMd5Record {
    /// Chunk the range lives in
    pub archive_index: u32,

    /// Start of the range inside the chunk
    pub offset: u32,

    /// Length of the range
    pub length: u32,

    /// MD5 of the stored bytes
    pub checksum: [u8; 16],
}

/// Archive level checksums closing the version 2 trailer
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct OtherMd5Section {
    /// MD5 of the directory tree bytes
    pub tree_checksum: [u8; 16],

    /// MD5 of the archive MD5 section bytes
    pub archive_md5_section_checksum: [u8; 16],

    /// Aggregate over the two checksums above and every chunk
    pub archive_checksum: [u8; 16],
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinRead;
    use binrw::BinWrite;
    use pretty_assertions::assert_eq;

    use crate::error::Result;
    use crate::types::{
        ArchiveMd5Record, VpkEntryRecord, VpkHeader, VpkHeaderV2, COMPRESSED_FLAG, DIR_INDEX,
    };

    #[test]
    fn read_v1_header() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x34, 0x12, 0xAA, 0x55,
            0x01, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x00,
        ]);

        let expected = VpkHeader {
            version: 1,
            tree_size: 32,
            extended: None,
        };

        let header = VpkHeader::read(&mut input)?;
        assert_eq!(header, expected);
        assert_eq!(header.size(), 12);

        Ok(())
    }

    #[test]
    fn read_v2_header() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x34, 0x12, 0xAA, 0x55,
            0x02, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x00,
            0x0B, 0x00, 0x00, 0x00,
            0x1C, 0x00, 0x00, 0x00,
            0x30, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ]);

        let expected = VpkHeader {
            version: 2,
            tree_size: 32,
            extended: Some(VpkHeaderV2 {
                file_data_section_size: 11,
                archive_md5_section_size: 28,
                other_md5_section_size: 48,
                signature_section_size: 0,
            }),
        };

        let header = VpkHeader::read(&mut input)?;
        assert_eq!(header, expected);
        assert_eq!(header.size(), 28);

        Ok(())
    }

    #[test]
    fn read_invalid_signature() {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x45, 0x45, 0x52, 0x54,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ]);

        assert!(VpkHeader::read(&mut input).is_err());
    }

    #[test]
    fn write_v2_header() -> Result<()> {
        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            0x34, 0x12, 0xAA, 0x55,
            0x02, 0x00, 0x00, 0x00,
            0x05, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x30, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let header = VpkHeader {
            version: 2,
            tree_size: 5,
            extended: Some(VpkHeaderV2 {
                other_md5_section_size: 48,
                ..Default::default()
            }),
        };

        let mut actual = Vec::new();
        header.write(&mut Cursor::new(&mut actual))?;

        assert_eq!(actual, expected);

        Ok(())
    }

    #[test]
    fn read_record() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x26, 0x39, 0xF4, 0xCB,
            0x05, 0x00,
            0x03, 0x80,
            0x10, 0x00, 0x00, 0x00,
            0x0B, 0x00, 0x00, 0x00,
            0xFF, 0xFF,
        ]);

        let expected = VpkEntryRecord {
            crc32: 0xCBF43926,
            preload_length: 5,
            archive_index: 3 | COMPRESSED_FLAG,
            entry_offset: 16,
            entry_length: 11,
            ..Default::default()
        };

        let record = VpkEntryRecord::read(&mut input)?;
        assert_eq!(record, expected);
        assert_eq!(record.chunk_index(), 3);
        assert!(record.is_compressed());

        Ok(())
    }

    #[test]
    fn write_record() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
            0xFF, 0x7F,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0xFF, 0xFF,
        ];

        let record = VpkEntryRecord::default();
        assert_eq!(record.chunk_index(), DIR_INDEX);
        assert!(!record.is_compressed());

        let mut actual = Vec::new();
        record.write(&mut Cursor::new(&mut actual))?;

        assert_eq!(actual, expected);

        Ok(())
    }

    #[test]
    fn write_archive_md5_record() -> Result<()> {
        let record = ArchiveMd5Record {
            archive_index: 1,
            offset: 2,
            length: 3,
            checksum: [0xAB; 16],
        };

        let mut actual = Vec::new();
        record.write(&mut Cursor::new(&mut actual))?;

        assert_eq!(actual.len(), 28);
        assert_eq!(&actual[..12], &[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
        assert_eq!(&actual[12..], &[0xAB; 16]);

        Ok(())
    }
}
