//! Writer configuration.
//!
//! [`XmlOptions`] holds what the user asked for, with unset entries left to be chosen
//! automatically. [`XmlOptions::resolve`] turns it into the [`XmlSettings`] a writer actually
//! uses, rejecting combinations that cannot be represented in a file.

use crate::blocks::HeaderType;
use crate::compression::Compressor;
use crate::encoding::Encoder;
use crate::model::{ByteOrder, ScalarType};
use crate::Error;

/// Placement of data array payloads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataFormat {
    /// Payload is written as the text of the `DataArray` element.
    Inlined,
    /// Payload is written to the `AppendedData` section and referenced by an offset.
    Appended,
}

/// Options of XML writers. Unset options are resolved automatically.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct XmlOptions {
    pub encoder: Option<Encoder>,
    pub compressor: Option<Compressor>,
    pub data_format: Option<DataFormat>,
    pub header: Option<HeaderType>,
    pub coordinate_precision: Option<ScalarType>,
    pub byte_order: Option<ByteOrder>,
}

/// Fully resolved writer configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct XmlSettings {
    pub encoder: Encoder,
    pub compressor: Compressor,
    pub data_format: DataFormat,
    pub header: HeaderType,
    pub coordinate_precision: ScalarType,
    pub byte_order: ByteOrder,
}

/// Compressor used for binary data when none is requested.
pub fn default_compressor() -> Compressor {
    if cfg!(feature = "compression") {
        Compressor::lz4()
    } else {
        Compressor::None
    }
}

impl XmlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoder(mut self, encoder: Encoder) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = Some(data_format);
        self
    }

    pub fn with_header_type(mut self, header: HeaderType) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_coordinate_precision(mut self, precision: ScalarType) -> Self {
        self.coordinate_precision = Some(precision);
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }

    /// Chooses defaults for unset options and validates the combination.
    pub fn resolve(&self) -> Result<XmlSettings, Error> {
        let encoder = self.encoder.clone().unwrap_or(Encoder::Base64);
        let data_format = self.data_format.unwrap_or(if encoder.is_ascii() {
            DataFormat::Inlined
        } else {
            DataFormat::Appended
        });

        let compressor = match (&encoder, self.compressor) {
            (Encoder::Ascii(_), Some(c)) if !c.is_none() => {
                log::warn!("Ascii output cannot be compressed, ignoring {:?}", c);
                Compressor::None
            }
            (Encoder::Ascii(_), _) => Compressor::None,
            (_, Some(c)) => c,
            (_, None) => default_compressor(),
        };

        match (&encoder, data_format) {
            (Encoder::Raw, DataFormat::Inlined) => {
                return Err(Error::Configuration(
                    "raw binary data cannot be inlined into XML text".to_string(),
                ))
            }
            (Encoder::Ascii(_), DataFormat::Appended) => {
                return Err(Error::Configuration(
                    "appended data must be encoded as raw binary or base64".to_string(),
                ))
            }
            _ => {}
        }

        if compressor.block_size() == Some(0) {
            return Err(Error::Size("block size must be positive".to_string()));
        }
        if !compressor.is_available() {
            return Err(Error::Configuration(format!(
                "{:?} requires the \"compression\" feature",
                compressor
            )));
        }

        let coordinate_precision = self.coordinate_precision.unwrap_or(ScalarType::F64);
        if !coordinate_precision.is_float() {
            return Err(Error::Configuration(format!(
                "coordinates must be stored as floats, not {}",
                coordinate_precision
            )));
        }

        Ok(XmlSettings {
            encoder,
            compressor,
            data_format,
            header: self.header.unwrap_or_default(),
            coordinate_precision,
            byte_order: self.byte_order.unwrap_or_default(),
        })
    }
}
