//! Versioned frame around a compressed archive.
//!
//! Layout: `"STSH"`, format version, codec id, payload length (u64 BE),
//! SHA-256 of the payload, payload. The length and digest are filled in once
//! the payload has been streamed out. On read the whole payload is checked
//! before anything is decompressed, so truncated or tampered objects never
//! reach the extractor.

use crate::compression::{codec_from_id, codec_id};
use sha2::{Digest, Sha256};
use stash_core::{CompressionType, Error, Result};
use std::io::{self, Read, Seek, SeekFrom, Take, Write};

pub const MAGIC: &[u8; 4] = b"STSH";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4 + 1 + 1 + 8 + 32;

const LEN_OFFSET: u64 = 6;

/// Size and digest of a sealed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Total object size, header included.
    pub bytes: u64,
    /// Hex SHA-256 of the payload.
    pub checksum: String,
}

/// Writes an envelope to a seekable sink, hashing the payload as it passes.
pub struct EnvelopeWriter<W: Write + Seek> {
    inner: W,
    start: u64,
    hasher: Sha256,
    payload_len: u64,
}

impl<W: Write + Seek> EnvelopeWriter<W> {
    /// Write a provisional header; payload bytes follow through `Write`.
    pub fn new(mut inner: W, compression: CompressionType) -> Result<Self> {
        let start = inner.stream_position().map_err(write_error)?;
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(MAGIC);
        header[4] = FORMAT_VERSION;
        header[5] = codec_id(compression);
        inner.write_all(&header).map_err(write_error)?;

        Ok(Self {
            inner,
            start,
            hasher: Sha256::new(),
            payload_len: 0,
        })
    }

    /// Patch the length and digest into the header and flush.
    pub fn finish(self) -> Result<(W, ObjectInfo)> {
        let Self {
            mut inner,
            start,
            hasher,
            payload_len,
        } = self;
        let digest = hasher.finalize();

        inner
            .seek(SeekFrom::Start(start + LEN_OFFSET))
            .map_err(write_error)?;
        inner
            .write_all(&payload_len.to_be_bytes())
            .map_err(write_error)?;
        inner.write_all(&digest).map_err(write_error)?;
        let end = inner.seek(SeekFrom::End(0)).map_err(write_error)?;
        inner.flush().map_err(write_error)?;

        let info = ObjectInfo {
            bytes: end - start,
            checksum: hex::encode(digest),
        };
        Ok((inner, info))
    }
}

impl<W: Write + Seek> Write for EnvelopeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.payload_len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_error(e: io::Error) -> Error {
    Error::Internal(format!("Failed to write cache object: {}", e))
}

/// Verify an envelope and return its codec and a reader over the payload.
///
/// The payload is read twice: once here to check length and digest, then
/// by the caller to decompress it.
pub fn open<R: Read + Seek>(mut reader: R) -> Result<(CompressionType, Take<R>)> {
    let mut header = [0u8; HEADER_LEN];
    let read = read_up_to(&mut reader, &mut header)?;
    if read < HEADER_LEN {
        return Err(Error::CorruptStream(format!(
            "object is {} bytes, shorter than the {} byte header",
            read, HEADER_LEN
        )));
    }

    if &header[0..4] != MAGIC {
        return Err(Error::CorruptStream("bad magic".to_string()));
    }
    if header[4] != FORMAT_VERSION {
        return Err(Error::CorruptStream(format!(
            "unsupported format version {}",
            header[4]
        )));
    }
    let compression = codec_from_id(header[5])
        .ok_or_else(|| Error::CorruptStream(format!("unknown codec id {}", header[5])))?;

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[6..14]);
    let expected_len = u64::from_be_bytes(len_bytes);
    let payload_start = reader.stream_position().map_err(read_error)?;

    let mut hasher = Sha256::new();
    let actual_len = io::copy(&mut reader, &mut hasher).map_err(read_error)?;
    if actual_len != expected_len {
        return Err(Error::CorruptStream(format!(
            "payload is {} bytes, header says {}",
            actual_len, expected_len
        )));
    }

    let expected_digest = &header[14..HEADER_LEN];
    let actual_digest = hasher.finalize();
    if actual_digest.as_slice() != expected_digest {
        return Err(Error::CorruptStream(format!(
            "checksum mismatch: expected {}, got {}",
            hex::encode(expected_digest),
            hex::encode(actual_digest)
        )));
    }

    reader
        .seek(SeekFrom::Start(payload_start))
        .map_err(read_error)?;
    Ok((compression, reader.take(expected_len)))
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        }
    }
    Ok(filled)
}

fn read_error(e: io::Error) -> Error {
    Error::Internal(format!("Failed to read cache object: {}", e))
}
