//! Splitting of raw byte buffers into blocks for block-wise compression.
//!
//! All sizes describing blocks end up in the binary header of a data array. The integer type of
//! that header is given by [`HeaderType`], and every size is checked against its range before
//! anything is written.

use std::ops::Range;

use byteorder::{ByteOrder as _, BE, LE};

use crate::model::{ByteOrder, ScalarType};
use crate::Error;

/// Integer width of binary data array headers.
///
/// This corresponds to the `header_type` attribute of a `VTKFile` element. The same width is used
/// for connectivity and offset arrays of unstructured grids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeaderType {
    UInt32,
    #[default]
    UInt64,
}

impl HeaderType {
    /// Number of bytes of one header entry.
    pub fn width(self) -> usize {
        match self {
            HeaderType::UInt32 => 4,
            HeaderType::UInt64 => 8,
        }
    }

    /// Largest size representable by this header type.
    pub fn max_value(self) -> u64 {
        match self {
            HeaderType::UInt32 => u32::MAX as u64,
            HeaderType::UInt64 => u64::MAX,
        }
    }

    pub fn scalar_type(self) -> ScalarType {
        match self {
            HeaderType::UInt32 => ScalarType::U32,
            HeaderType::UInt64 => ScalarType::U64,
        }
    }

    pub fn vtk_name(self) -> &'static str {
        self.scalar_type().vtk_name()
    }

    pub fn from_vtk_name(name: &str) -> Option<HeaderType> {
        match name {
            "UInt32" => Some(HeaderType::UInt32),
            "UInt64" => Some(HeaderType::UInt64),
            _ => None,
        }
    }

    /// Checks that `value` fits into a header entry.
    pub fn check(self, value: u64, what: &str) -> Result<u64, Error> {
        if value > self.max_value() {
            return Err(Error::Size(format!(
                "{} of {} does not fit into a {} header",
                what,
                value,
                self.vtk_name()
            )));
        }
        Ok(value)
    }

    /// Serializes header entries, checking that each of them fits.
    pub fn write_values(self, values: &[u64], bo: ByteOrder) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; values.len() * self.width()];
        match self {
            HeaderType::UInt32 => {
                let narrow = values
                    .iter()
                    .map(|&v| self.check(v, "header entry").map(|v| v as u32))
                    .collect::<Result<Vec<_>, _>>()?;
                match bo {
                    ByteOrder::BigEndian => BE::write_u32_into(&narrow, &mut out),
                    ByteOrder::LittleEndian => LE::write_u32_into(&narrow, &mut out),
                }
            }
            HeaderType::UInt64 => match bo {
                ByteOrder::BigEndian => BE::write_u64_into(values, &mut out),
                ByteOrder::LittleEndian => LE::write_u64_into(values, &mut out),
            },
        }
        Ok(out)
    }

    /// Reads `count` header entries from the front of `bytes`.
    pub fn read_values(self, bytes: &[u8], count: usize, bo: ByteOrder) -> Result<Vec<u64>, Error> {
        let len = count * self.width();
        if bytes.len() < len {
            return Err(Error::Encoding(format!(
                "expected a header of {} bytes but only {} are available",
                len,
                bytes.len()
            )));
        }
        let bytes = &bytes[..len];
        Ok(match self {
            HeaderType::UInt32 => {
                let mut out = vec![0u32; count];
                match bo {
                    ByteOrder::BigEndian => BE::read_u32_into(bytes, &mut out),
                    ByteOrder::LittleEndian => LE::read_u32_into(bytes, &mut out),
                }
                out.into_iter().map(u64::from).collect()
            }
            HeaderType::UInt64 => {
                let mut out = vec![0u64; count];
                match bo {
                    ByteOrder::BigEndian => BE::read_u64_into(bytes, &mut out),
                    ByteOrder::LittleEndian => LE::read_u64_into(bytes, &mut out),
                }
                out
            }
        })
    }
}

/// A decomposition of `total_size` bytes into blocks of `block_size` bytes.
///
/// The last block holds `residual_block_size` bytes if the size does not divide evenly, otherwise
/// `residual_block_size` is zero and all blocks are full.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Blocks {
    pub total_size: u64,
    pub block_size: u64,
    pub residual_block_size: u64,
    pub number_of_blocks: u64,
}

impl Blocks {
    pub fn new(total_size: u64, block_size: u64, header: HeaderType) -> Result<Blocks, Error> {
        if block_size == 0 {
            return Err(Error::Size("block size must be positive".to_string()));
        }
        header.check(total_size, "data size")?;
        header.check(block_size, "block size")?;
        let residual_block_size = total_size % block_size;
        let number_of_blocks = total_size / block_size + u64::from(residual_block_size > 0);
        Ok(Blocks {
            total_size,
            block_size,
            residual_block_size,
            number_of_blocks,
        })
    }

    /// Uncompressed size of the block at `index`.
    pub fn raw_size(&self, index: u64) -> u64 {
        if index + 1 == self.number_of_blocks && self.residual_block_size > 0 {
            self.residual_block_size
        } else {
            self.block_size
        }
    }

    /// Byte ranges of all blocks within the raw buffer.
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.number_of_blocks).map(move |i| {
            let begin = (i * self.block_size) as usize;
            begin..begin + self.raw_size(i) as usize
        })
    }
}

/// Blocks together with the size of each block after compression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedBlocks {
    pub blocks: Blocks,
    compressed_sizes: Vec<u64>,
}

impl CompressedBlocks {
    pub fn new(
        blocks: Blocks,
        compressed_sizes: Vec<u64>,
        header: HeaderType,
    ) -> Result<CompressedBlocks, Error> {
        if compressed_sizes.len() as u64 != blocks.number_of_blocks {
            return Err(Error::Size(format!(
                "{} compressed sizes given for {} blocks",
                compressed_sizes.len(),
                blocks.number_of_blocks
            )));
        }
        for &size in &compressed_sizes {
            header.check(size, "compressed block size")?;
        }
        Ok(CompressedBlocks {
            blocks,
            compressed_sizes,
        })
    }

    pub fn compressed_sizes(&self) -> &[u64] {
        &self.compressed_sizes
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_sizes
            .iter()
            .fold(0u64, |sum, &size| sum.saturating_add(size))
    }

    /// Header entries `[n, block_size, residual, c_0, .., c_{n-1}]`.
    pub fn header_values(&self) -> Vec<u64> {
        let mut values = Vec::with_capacity(3 + self.compressed_sizes.len());
        values.push(self.blocks.number_of_blocks);
        values.push(self.blocks.block_size);
        values.push(self.blocks.residual_block_size);
        values.extend_from_slice(&self.compressed_sizes);
        values
    }

    /// Reconstructs the blocks from the header entries written by [`header_values`].
    ///
    /// [`header_values`]: CompressedBlocks::header_values
    pub fn from_header_values(values: &[u64], header: HeaderType) -> Result<CompressedBlocks, Error> {
        let (num_blocks, block_size, residual) = match values {
            [n, bs, r, ..] => (*n, *bs, *r),
            _ => return Err(Error::Encoding("incomplete compression header".to_string())),
        };
        let sizes = &values[3..];
        if sizes.len() as u64 != num_blocks {
            return Err(Error::Encoding(format!(
                "compression header announces {} blocks but has {} sizes",
                num_blocks,
                sizes.len()
            )));
        }
        if num_blocks > 0 && residual >= block_size {
            return Err(Error::Encoding(format!(
                "residual block of {} bytes in blocks of {} bytes",
                residual, block_size
            )));
        }
        let overflow = || Error::Encoding("compression header sizes overflow".to_string());
        let total_size = match (num_blocks, residual) {
            (0, _) => 0,
            (n, 0) => n.checked_mul(block_size).ok_or_else(overflow)?,
            (n, r) => (n - 1)
                .checked_mul(block_size)
                .and_then(|full| full.checked_add(r))
                .ok_or_else(overflow)?,
        };
        sizes
            .iter()
            .try_fold(0u64, |sum, &size| sum.checked_add(size))
            .ok_or_else(overflow)?;
        let blocks = Blocks {
            total_size,
            block_size,
            residual_block_size: residual,
            number_of_blocks: num_blocks,
        };
        CompressedBlocks::new(blocks, sizes.to_vec(), header)
    }
}
