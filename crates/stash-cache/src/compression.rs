//! Streaming codecs for cache archives.

use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use stash_core::{CompressionType, Error, Result};
use std::io::{self, BufRead, Read, Write};

const ZSTD_LEVEL: i32 = 3;

/// Stable on-the-wire identifier for a codec.
pub fn codec_id(algorithm: CompressionType) -> u8 {
    match algorithm {
        CompressionType::None => 0,
        CompressionType::Zstd => 1,
        CompressionType::Gzip => 2,
        CompressionType::Lz4 => 3,
    }
}

pub fn codec_from_id(id: u8) -> Option<CompressionType> {
    match id {
        0 => Some(CompressionType::None),
        1 => Some(CompressionType::Zstd),
        2 => Some(CompressionType::Gzip),
        3 => Some(CompressionType::Lz4),
        _ => None,
    }
}

/// Compressing writer in front of `W`.
///
/// [`Encoder::finish`] must be called to flush the final frame.
pub enum Encoder<W: Write> {
    Plain(W),
    Zstd(zstd::stream::write::Encoder<'static, W>),
    Gzip(GzEncoder<W>),
    Lz4(FrameEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub fn new(inner: W, algorithm: CompressionType) -> Result<Self> {
        Ok(match algorithm {
            CompressionType::None => Encoder::Plain(inner),
            CompressionType::Zstd => Encoder::Zstd(
                zstd::stream::write::Encoder::new(inner, ZSTD_LEVEL)
                    .map_err(|e| Error::Internal(format!("Zstd encoder setup failed: {}", e)))?,
            ),
            CompressionType::Gzip => Encoder::Gzip(GzEncoder::new(inner, GzLevel::default())),
            CompressionType::Lz4 => Encoder::Lz4(FrameEncoder::new(inner)),
        })
    }

    /// Write the trailing frame and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(inner) => Ok(inner),
            Encoder::Zstd(encoder) => encoder.finish(),
            Encoder::Gzip(encoder) => encoder.finish(),
            Encoder::Lz4(encoder) => encoder.finish().map_err(io::Error::other),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(inner) => inner.write(buf),
            Encoder::Zstd(encoder) => encoder.write(buf),
            Encoder::Gzip(encoder) => encoder.write(buf),
            Encoder::Lz4(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(inner) => inner.flush(),
            Encoder::Zstd(encoder) => encoder.flush(),
            Encoder::Gzip(encoder) => encoder.flush(),
            Encoder::Lz4(encoder) => encoder.flush(),
        }
    }
}

/// Decompressing reader over `reader`.
///
/// Read errors from the returned reader mean the payload is not valid for
/// the codec.
pub fn decoder<'a, R: BufRead + 'a>(
    reader: R,
    algorithm: CompressionType,
) -> Result<Box<dyn Read + 'a>> {
    Ok(match algorithm {
        CompressionType::None => Box::new(reader),
        CompressionType::Zstd => Box::new(
            zstd::stream::read::Decoder::with_buffer(reader)
                .map_err(|e| Error::CorruptStream(format!("Zstd decoder setup failed: {}", e)))?,
        ),
        CompressionType::Gzip => Box::new(GzDecoder::new(reader)),
        CompressionType::Lz4 => Box::new(FrameDecoder::new(reader)),
    })
}
