//! Block-wise compression of raw data array bytes.
//!
//! Each block is compressed independently, which lets readers locate any block from the sizes
//! stored in the array header. The backends are only available with the `compression` feature.

#[cfg(feature = "compression")]
use std::io::{Read, Write};

use crate::blocks::{Blocks, CompressedBlocks, HeaderType};
use crate::Error;

/// Block size used by VTK writers.
pub const DEFAULT_BLOCK_SIZE: u64 = 1 << 15;

/// Compression algorithm applied to binary data arrays.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Compressor {
    /// Data is stored as is.
    None,
    /// LZ4 block format.
    Lz4 { block_size: u64 },
    /// Zlib streams with a compression level between 0 and 9.
    Zlib { block_size: u64, level: u32 },
    /// XZ streams with an LZMA preset between 0 and 9.
    Lzma { block_size: u64, level: u32 },
}

impl Default for Compressor {
    fn default() -> Compressor {
        Compressor::None
    }
}

impl Compressor {
    pub fn lz4() -> Compressor {
        Compressor::Lz4 {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn zlib() -> Compressor {
        Compressor::Zlib {
            block_size: DEFAULT_BLOCK_SIZE,
            level: 6,
        }
    }

    pub fn lzma() -> Compressor {
        Compressor::Lzma {
            block_size: DEFAULT_BLOCK_SIZE,
            level: 1,
        }
    }

    /// The same compressor operating on blocks of `block_size` bytes.
    pub fn with_block_size(self, block_size: u64) -> Compressor {
        match self {
            Compressor::None => Compressor::None,
            Compressor::Lz4 { .. } => Compressor::Lz4 { block_size },
            Compressor::Zlib { level, .. } => Compressor::Zlib { block_size, level },
            Compressor::Lzma { level, .. } => Compressor::Lzma { block_size, level },
        }
    }

    pub fn block_size(&self) -> Option<u64> {
        match *self {
            Compressor::None => None,
            Compressor::Lz4 { block_size }
            | Compressor::Zlib { block_size, .. }
            | Compressor::Lzma { block_size, .. } => Some(block_size),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Compressor::None)
    }

    /// Whether the backend for this compressor was compiled in.
    pub fn is_available(&self) -> bool {
        self.is_none() || cfg!(feature = "compression")
    }

    /// Value of the `compressor` attribute in a `VTKFile` element.
    pub fn vtk_name(&self) -> Option<&'static str> {
        match self {
            Compressor::None => None,
            Compressor::Lz4 { .. } => Some("vtkLZ4DataCompressor"),
            Compressor::Zlib { .. } => Some("vtkZLibDataCompressor"),
            Compressor::Lzma { .. } => Some("vtkLZMADataCompressor"),
        }
    }

    /// Compressor for a `compressor` attribute value. The block size is taken from data headers.
    pub fn from_vtk_name(name: &str) -> Option<Compressor> {
        match name {
            "vtkLZ4DataCompressor" => Some(Compressor::lz4()),
            "vtkZLibDataCompressor" => Some(Compressor::zlib()),
            "vtkLZMADataCompressor" => Some(Compressor::lzma()),
            _ => None,
        }
    }

    /// Compresses `data` block by block.
    ///
    /// Without compression the data is split into a single block. All sizes are checked against
    /// `header`.
    pub fn compress(
        &self,
        data: &[u8],
        header: HeaderType,
    ) -> Result<(CompressedBlocks, Vec<u8>), Error> {
        let total = data.len() as u64;
        let block_size = match self.block_size() {
            Some(block_size) => block_size,
            None => total.max(1),
        };
        let blocks = Blocks::new(total, block_size, header)?;

        let ranges: Vec<_> = blocks.ranges().collect();
        #[cfg(feature = "parallel")]
        let compressed: Vec<Vec<u8>> = {
            use rayon::prelude::*;
            ranges
                .into_par_iter()
                .map(|range| self.compress_block(&data[range]))
                .collect::<Result<_, Error>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let compressed: Vec<Vec<u8>> = ranges
            .into_iter()
            .map(|range| self.compress_block(&data[range]))
            .collect::<Result<_, Error>>()?;

        let sizes: Vec<u64> = compressed.iter().map(|block| block.len() as u64).collect();
        let out = compressed.concat();
        log::trace!(
            "compressed {} bytes into {} blocks of {} bytes total",
            total,
            blocks.number_of_blocks,
            out.len()
        );
        Ok((CompressedBlocks::new(blocks, sizes, header)?, out))
    }

    /// Inverse of [`compress`](Compressor::compress).
    pub fn decompress(&self, blocks: &CompressedBlocks, data: &[u8]) -> Result<Vec<u8>, Error> {
        if blocks.compressed_size() > data.len() as u64 {
            return Err(Error::Encoding(format!(
                "compressed data holds {} bytes but the header announces {}",
                data.len(),
                blocks.compressed_size()
            )));
        }
        // The announced size is only trusted as far as the data present supports it.
        let mut out = Vec::with_capacity(blocks.blocks.total_size.min(data.len() as u64) as usize);
        let mut begin = 0usize;
        for (i, &size) in blocks.compressed_sizes().iter().enumerate() {
            let block = usize::try_from(size)
                .ok()
                .and_then(|size| data.get(begin..begin.checked_add(size)?))
                .ok_or_else(|| {
                    Error::Encoding(format!("block {} of {} bytes exceeds the data", i, size))
                })?;
            let raw_size = usize::try_from(blocks.blocks.raw_size(i as u64)).map_err(|_| {
                Error::Encoding(format!("block {} is too large for this platform", i))
            })?;
            if !self.can_expand_to(block.len(), raw_size) {
                return Err(Error::Encoding(format!(
                    "block {} of {} bytes cannot hold {} bytes",
                    i,
                    block.len(),
                    raw_size
                )));
            }
            let end = begin + block.len();
            let block = self.decompress_block(block, raw_size)?;
            if block.len() != raw_size {
                return Err(Error::Compression(format!(
                    "block {} decompressed to {} bytes instead of {}",
                    i,
                    block.len(),
                    raw_size
                )));
            }
            out.extend_from_slice(&block);
            begin = end;
        }
        Ok(out)
    }

    fn compress_block(&self, block: &[u8]) -> Result<Vec<u8>, Error> {
        match *self {
            Compressor::None => Ok(block.to_vec()),
            #[cfg(feature = "compression")]
            Compressor::Lz4 { .. } => Ok(lz4::block::compress(block)),
            #[cfg(feature = "compression")]
            Compressor::Zlib { level, .. } => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level));
                encoder.write_all(block)?;
                Ok(encoder.finish()?)
            }
            #[cfg(feature = "compression")]
            Compressor::Lzma { level, .. } => {
                let stream = xz2::stream::Stream::new_easy_encoder(level, xz2::stream::Check::Crc32)
                    .map_err(|e| Error::Compression(e.to_string()))?;
                let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
                encoder.write_all(block)?;
                Ok(encoder.finish()?)
            }
            #[cfg(not(feature = "compression"))]
            _ => Err(self.unavailable()),
        }
    }

    /// Whether a compressed block of `len` bytes can decompress to `raw_size` bytes.
    fn can_expand_to(&self, len: usize, raw_size: usize) -> bool {
        match *self {
            Compressor::None => len == raw_size,
            // A sequence of 255 length bytes adds at most 255 output bytes.
            Compressor::Lz4 { .. } => raw_size <= len.saturating_mul(255).saturating_add(16),
            _ => true,
        }
    }

    fn decompress_block(&self, block: &[u8], raw_size: usize) -> Result<Vec<u8>, Error> {
        match *self {
            Compressor::None => Ok(block.to_vec()),
            #[cfg(feature = "compression")]
            Compressor::Lz4 { .. } => lz4::block::decompress(block, raw_size)
                .map_err(|e| Error::Compression(e.to_string())),
            #[cfg(feature = "compression")]
            Compressor::Zlib { .. } => {
                let mut out = Vec::with_capacity(raw_size.min(block.len().saturating_mul(4)));
                flate2::read::ZlibDecoder::new(block).read_to_end(&mut out)?;
                Ok(out)
            }
            #[cfg(feature = "compression")]
            Compressor::Lzma { .. } => {
                let mut out = Vec::with_capacity(raw_size.min(block.len().saturating_mul(4)));
                xz2::read::XzDecoder::new(block).read_to_end(&mut out)?;
                Ok(out)
            }
            #[cfg(not(feature = "compression"))]
            _ => {
                let _ = raw_size;
                Err(self.unavailable())
            }
        }
    }

    #[cfg(not(feature = "compression"))]
    fn unavailable(&self) -> Error {
        Error::Configuration(format!(
            "{:?} requires the \"compression\" feature",
            self
        ))
    }
}
