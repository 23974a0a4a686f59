//! Entry payload compression and decompression handling.
//!
//! Only version 2 archives compress payloads. A compressed payload is the uncompressed length as a
//! little endian `u32` followed by a zlib stream. Preload bytes are never compressed.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tracing::instrument;

use crate::error::{Error, Result};

/// Identifies how an entry's chunk payload is stored
///
/// Archives choose whether to compress via [`crate::archive::VpkOptions::compression`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stores the data as it is
    #[default]
    None,

    /// Compress the data using Zlib
    Zlib,
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionMethod::None => write!(f, "none"),
            CompressionMethod::Zlib => write!(f, "zlib"),
        }
    }
}

/// Compress the non-preload part of an entry into a length prefixed zlib payload
#[instrument(skip(data), fields(size = data.len()), err)]
pub(crate) fn encode_payload(data: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(data.len()).map_err(|_| Error::ChunkSizeExceeded {
        size: data.len() as u64,
        limit: u32::MAX as u64,
    })?;

    let mut out = Vec::with_capacity(data.len() / 2 + 4);
    out.write_u32::<LittleEndian>(length)?;

    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decode a stored chunk payload back into the entry's bytes
#[instrument(skip(stored), fields(size = stored.len()), err)]
pub(crate) fn decode_payload(stored: &[u8], compression: CompressionMethod) -> Result<Vec<u8>> {
    match compression {
        CompressionMethod::None => Ok(stored.to_vec()),
        CompressionMethod::Zlib => {
            let mut reader = stored;
            let expected = reader
                .read_u32::<LittleEndian>()
                .map_err(|_| Error::CorruptPayload("missing uncompressed length".into()))?
                as usize;

            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(reader)
                .read_to_end(&mut out)
                .map_err(|e| Error::CorruptPayload(e.to_string()))?;

            if out.len() != expected {
                return Err(Error::CorruptPayload(format!(
                    "expected {expected} bytes after decompression, found {}",
                    out.len()
                )));
            }
            Ok(out)
        }
    }
}

/// Read the uncompressed length prefix of a compressed payload
pub(crate) fn uncompressed_length<R: Read>(mut reader: R) -> Result<u32> {
    Ok(reader.read_u32::<LittleEndian>()?)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{decode_payload, encode_payload, uncompressed_length, CompressionMethod};
    use crate::error::{Error, Result};

    #[test]
    fn raw_payload_is_returned_verbatim() -> Result<()> {
        let data = b"Hello World";
        assert_eq!(decode_payload(data, CompressionMethod::None)?, data.to_vec());
        Ok(())
    }

    #[test]
    fn compressed_payload_carries_length_prefix() -> Result<()> {
        let data = vec![0x41u8; 4096];
        let stored = encode_payload(&data)?;

        assert_eq!(&stored[..4], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&stored[4..6], &[0x78, 0x9C]);
        assert!(stored.len() < data.len());
        assert_eq!(uncompressed_length(&stored[..])?, 4096);
        assert_eq!(decode_payload(&stored, CompressionMethod::Zlib)?, data);

        Ok(())
    }

    #[test]
    fn truncated_compressed_payload_is_rejected() -> Result<()> {
        let stored = encode_payload(&[0x41; 512])?;
        let result = decode_payload(&stored[..6], CompressionMethod::Zlib);
        assert!(matches!(result, Err(Error::CorruptPayload(_))));

        let result = decode_payload(&[0x01, 0x02], CompressionMethod::Zlib);
        assert!(matches!(result, Err(Error::CorruptPayload(_))));

        Ok(())
    }
}
