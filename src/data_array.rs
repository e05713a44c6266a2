//! Wire representation of a single data array.
//!
//! Binary arrays are written as a header followed by the payload. Without compression the header
//! is the number of payload bytes. With compression it is
//!
//! ```text
//! [number of blocks, block size, residual block size, compressed size of each block]
//! ```
//!
//! followed by the concatenated compressed blocks. All header entries are integers of the
//! selected [`HeaderType`]. With base64, header and payload are encoded separately. ASCII arrays
//! have no header and are never compressed.

use std::borrow::Cow;

use crate::blocks::{CompressedBlocks, HeaderType};
use crate::compression::Compressor;
use crate::encoding::{self, Encoder};
use crate::model::{ByteOrder, IOBuffer, ScalarType};
use crate::options::{DataFormat, XmlSettings};
use crate::Error;

/// Value of the `format` attribute of a `DataArray` element.
pub fn format_attribute(encoder: &Encoder, format: DataFormat) -> &'static str {
    match (encoder, format) {
        (Encoder::Ascii(_), _) => "ascii",
        (_, DataFormat::Inlined) => "binary",
        (_, DataFormat::Appended) => "appended",
    }
}

/// Serializes and deserializes data arrays with fixed codec settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ArraySerializer {
    pub compressor: Compressor,
    pub encoder: Encoder,
    pub header: HeaderType,
    pub byte_order: ByteOrder,
}

impl From<&XmlSettings> for ArraySerializer {
    fn from(settings: &XmlSettings) -> Self {
        ArraySerializer {
            compressor: settings.compressor,
            encoder: settings.encoder.clone(),
            header: settings.header,
            byte_order: settings.byte_order,
        }
    }
}

impl ArraySerializer {
    /// Produces the encoded header and payload of `buf`.
    pub fn serialize(&self, buf: &IOBuffer) -> Result<Vec<u8>, Error> {
        if let Encoder::Ascii(format) = &self.encoder {
            return Ok(encoding::format_ascii(buf, format).into_bytes());
        }

        let raw = buf.to_bytes(self.byte_order);
        let (header_values, payload) = if self.compressor.is_none() {
            let size = self.header.check(raw.len() as u64, "data size")?;
            (vec![size], Cow::Borrowed(raw.as_slice()))
        } else {
            let (blocks, compressed) = self.compressor.compress(&raw, self.header)?;
            (blocks.header_values(), Cow::Owned(compressed))
        };
        let header = self.header.write_values(&header_values, self.byte_order)?;

        let mut out = Vec::new();
        self.encoder.encode_into(&header, &mut out)?;
        self.encoder.encode_into(&payload, &mut out)?;
        log::trace!(
            "serialized {} bytes of {} data into {} encoded bytes",
            raw.len(),
            buf.scalar_type(),
            out.len()
        );
        Ok(out)
    }

    /// Decodes an array starting at the front of `encoded`.
    ///
    /// Trailing bytes after the array are ignored, which allows decoding directly from an
    /// offset into appended data.
    pub fn deserialize(&self, encoded: &[u8], scalar_type: ScalarType) -> Result<IOBuffer, Error> {
        if self.encoder.is_ascii() {
            let text = std::str::from_utf8(encoded)
                .map_err(|e| Error::Encoding(format!("ascii data is not valid UTF-8: {}", e)))?;
            return encoding::parse_ascii(text, scalar_type);
        }

        let mut reader = EncodedReader::new(&self.encoder, encoded);
        let width = self.header.width();
        let raw = if self.compressor.is_none() {
            let header = reader.read_unit(width)?;
            let size = self.header.read_values(&header, 1, self.byte_order)?[0];
            reader.read_unit(to_usize(size)?)?
        } else {
            let prefix = reader.peek(3 * width)?;
            let num_blocks = to_usize(self.header.read_values(&prefix, 1, self.byte_order)?[0])?;
            let count = num_blocks
                .checked_add(3)
                .ok_or_else(|| Error::Encoding("invalid number of blocks".to_string()))?;
            let header_len = count
                .checked_mul(width)
                .ok_or_else(|| Error::Encoding("invalid number of blocks".to_string()))?;
            let header = reader.read_unit(header_len)?;
            let values = self.header.read_values(&header, count, self.byte_order)?;
            let blocks = CompressedBlocks::from_header_values(&values, self.header)?;
            let data = reader.read_unit(to_usize(blocks.compressed_size())?)?;
            self.compressor.decompress(&blocks, &data)?
        };
        IOBuffer::from_bytes(raw, scalar_type, self.byte_order)
    }
}

fn to_usize(value: u64) -> Result<usize, Error> {
    usize::try_from(value)
        .map_err(|_| Error::Size(format!("{} bytes cannot be addressed on this platform", value)))
}

/// Reads independently encoded units from the front of an encoded array.
struct EncodedReader<'a> {
    encoder: &'a Encoder,
    data: Cow<'a, [u8]>,
    pos: usize,
}

impl<'a> EncodedReader<'a> {
    fn new(encoder: &'a Encoder, data: &'a [u8]) -> Self {
        let data = match encoder {
            Encoder::Base64 if data.iter().any(|b| b.is_ascii_whitespace()) => Cow::Owned(
                data.iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect(),
            ),
            _ => Cow::Borrowed(data),
        };
        EncodedReader {
            encoder,
            data,
            pos: 0,
        }
    }

    fn encoded_range(&self, len: usize) -> Result<std::ops::Range<usize>, Error> {
        let remaining = self.data.len() - self.pos;
        match self.encoder.encoded_len(len) {
            Some(encoded_len) if encoded_len <= remaining => Ok(self.pos..self.pos + encoded_len),
            _ => Err(Error::Encoding(format!(
                "expected {} more bytes but only {} encoded bytes remain",
                len, remaining
            ))),
        }
    }

    /// Decodes the first `len` bytes of the next unit without consuming it.
    ///
    /// For base64, `len` must be a multiple of 3 so that the prefix is aligned to whole
    /// characters.
    fn peek(&self, len: usize) -> Result<Vec<u8>, Error> {
        debug_assert!(!matches!(self.encoder, Encoder::Base64) || len % 3 == 0);
        let range = self.encoded_range(len)?;
        self.encoder.decode(&self.data[range])
    }

    fn read_unit(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let range = self.encoded_range(len)?;
        let decoded = self.encoder.decode(&self.data[range.clone()])?;
        if decoded.len() != len {
            return Err(Error::Encoding(format!(
                "decoded {} bytes where {} were expected",
                decoded.len(),
                len
            )));
        }
        self.pos = range.end;
        Ok(decoded)
    }
}
