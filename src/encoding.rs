//! Encoders turning raw bytes or typed values into the text stored in XML files.

use std::io::Write;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nom::character::complete::multispace0;
use nom::combinator::all_consuming;
use nom::multi::many0;
use nom::number::complete::recognize_float_or_exceptions;
use nom::sequence::{preceded, terminated};
use nom::IResult;

use crate::model::{IOBuffer, ScalarType};
use crate::{match_buf, Error};

/// Number of bytes handed to the base64 encoder at once.
const BASE64_CHUNK_SIZE: usize = 3 * 4096;

/// Layout of ASCII encoded values.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AsciiFormat {
    /// Separator between two values on the same line.
    pub delimiter: String,
    /// Prefix of every line, e.g. indentation.
    pub line_prefix: String,
    /// Number of values per line. Zero puts all values on a single line.
    pub entries_per_line: usize,
}

impl Default for AsciiFormat {
    fn default() -> Self {
        AsciiFormat {
            delimiter: " ".to_string(),
            line_prefix: String::new(),
            entries_per_line: 10,
        }
    }
}

/// Encoding of data array values.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Encoder {
    /// Human readable values.
    Ascii(AsciiFormat),
    /// Standard base64 with padding.
    Base64,
    /// Unencoded bytes. Only usable for appended data.
    Raw,
}

impl Encoder {
    pub fn ascii() -> Encoder {
        Encoder::Ascii(AsciiFormat::default())
    }

    pub fn is_ascii(&self) -> bool {
        matches!(self, Encoder::Ascii(_))
    }

    /// Value of the `encoding` attribute of an `AppendedData` element.
    pub fn appended_encoding_name(&self) -> Option<&'static str> {
        match self {
            Encoder::Ascii(_) => None,
            Encoder::Base64 => Some("base64"),
            Encoder::Raw => Some("raw"),
        }
    }

    /// Number of bytes `len` raw bytes occupy once encoded.
    ///
    /// `None` for ascii and for lengths whose encoding cannot be addressed.
    pub fn encoded_len(&self, len: usize) -> Option<usize> {
        match self {
            Encoder::Ascii(_) => None,
            Encoder::Base64 => len.div_ceil(3).checked_mul(4),
            Encoder::Raw => Some(len),
        }
    }

    /// Encodes raw bytes into `out`.
    ///
    /// Each call is padded independently, so headers and payloads encoded by separate calls can
    /// be decoded separately as well.
    pub fn encode_into<W: Write>(&self, bytes: &[u8], out: &mut W) -> Result<(), Error> {
        match self {
            Encoder::Ascii(_) => {
                return Err(Error::Configuration(
                    "ascii encoding operates on typed values, not on raw bytes".to_string(),
                ))
            }
            Encoder::Base64 => {
                let mut encoder = base64::write::EncoderWriter::new(out, &STANDARD);
                for chunk in bytes.chunks(BASE64_CHUNK_SIZE) {
                    encoder.write_all(chunk)?;
                }
                encoder.finish()?;
            }
            Encoder::Raw => out.write_all(bytes)?,
        }
        Ok(())
    }

    pub fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.encoded_len(bytes.len()).unwrap_or(0));
        self.encode_into(bytes, &mut out)?;
        Ok(out)
    }

    /// Decodes bytes produced by a single call to [`encode`](Encoder::encode).
    pub fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Encoder::Ascii(_) => Err(Error::Configuration(
                "ascii data must be parsed with a known scalar type".to_string(),
            )),
            Encoder::Base64 => decode_base64(encoded),
            Encoder::Raw => Ok(encoded.to_vec()),
        }
    }
}

/// Decodes standard base64, ignoring whitespace between characters.
pub fn decode_base64(encoded: &[u8]) -> Result<Vec<u8>, Error> {
    let compact: Vec<u8> = encoded
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::Encoding(format!("invalid base64 data: {}", e)))
}

/// Renders values as delimited text.
pub fn format_ascii(buf: &IOBuffer, format: &AsciiFormat) -> String {
    let tokens: Vec<String> = match_buf!(buf; v => v.iter().map(|x| x.to_string()).collect());
    let per_line = if format.entries_per_line == 0 {
        tokens.len().max(1)
    } else {
        format.entries_per_line
    };
    tokens
        .chunks(per_line)
        .map(|line| format!("{}{}", format.line_prefix, line.join(&format.delimiter)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn number_tokens(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(terminated(
        many0(preceded(multispace0, recognize_float_or_exceptions)),
        multispace0,
    ))(input)
}

fn parse_values<T: FromStr>(tokens: &[&str]) -> Result<Vec<T>, Error> {
    tokens
        .iter()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|_| Error::Encoding(format!("invalid ascii value \"{}\"", token)))
        })
        .collect()
}

/// Parses whitespace separated values of the given type.
pub fn parse_ascii(text: &str, scalar_type: ScalarType) -> Result<IOBuffer, Error> {
    let (_, tokens) = number_tokens(text)
        .map_err(|e| Error::Encoding(format!("malformed ascii data: {}", e)))?;
    Ok(match scalar_type {
        ScalarType::U8 => IOBuffer::U8(parse_values(&tokens)?),
        ScalarType::I8 => IOBuffer::I8(parse_values(&tokens)?),
        ScalarType::U16 => IOBuffer::U16(parse_values(&tokens)?),
        ScalarType::I16 => IOBuffer::I16(parse_values(&tokens)?),
        ScalarType::U32 => IOBuffer::U32(parse_values(&tokens)?),
        ScalarType::I32 => IOBuffer::I32(parse_values(&tokens)?),
        ScalarType::U64 => IOBuffer::U64(parse_values(&tokens)?),
        ScalarType::I64 => IOBuffer::I64(parse_values(&tokens)?),
        ScalarType::F32 => IOBuffer::F32(parse_values(&tokens)?),
        ScalarType::F64 => IOBuffer::F64(parse_values(&tokens)?),
    })
}
