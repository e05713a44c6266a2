//! Data model shared by the writers and readers.
//!
//! Numeric data is held in an [`IOBuffer`], a vector of one of the scalar types VTK files can
//! store. A [`Field`] attaches a component layout to such a buffer.

use std::borrow::Cow;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use bytemuck::cast_slice;
use num_derive::FromPrimitive;
use num_traits::{NumCast, Zero};

use crate::Error;

/// Byte order of binary data and headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// The byte order of the target platform.
    pub fn native() -> ByteOrder {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Value of the `byte_order` attribute in a `VTKFile` element.
    pub fn attribute_name(self) -> &'static str {
        match self {
            ByteOrder::BigEndian => "BigEndian",
            ByteOrder::LittleEndian => "LittleEndian",
        }
    }

    pub fn from_attribute_name(name: &str) -> Option<ByteOrder> {
        match name {
            "BigEndian" => Some(ByteOrder::BigEndian),
            "LittleEndian" => Some(ByteOrder::LittleEndian),
            _ => None,
        }
    }
}

impl Default for ByteOrder {
    fn default() -> ByteOrder {
        ByteOrder::native()
    }
}

/// Types of scalars stored in data arrays.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarType {
    /// Data is interpreted as `u8` (unsigned 8 bit) integers.
    U8,
    /// Data is interpreted as `i8` (signed 8 bit) integers.
    I8,
    /// Data is interpreted as `u16` (unsigned 16 bit) integers.
    U16,
    /// Data is interpreted as `i16` (signed 16 bit) integers.
    I16,
    /// Data is interpreted as `u32` (unsigned 32 bit) integers.
    U32,
    /// Data is interpreted as `i32` (signed 32 bit) integers.
    I32,
    /// Data is interpreted as `u64` (unsigned 64 bit) integers.
    U64,
    /// Data is interpreted as `i64` (signed 64 bit) integers.
    I64,
    /// Data is interpreted as `f32` (single precision) floats.
    F32,
    /// Data is interpreted as `f64` (double precision) floats.
    F64,
}

impl ScalarType {
    /// Number of bytes occupied by one value.
    pub fn size(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::U64 | ScalarType::I64 | ScalarType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Name used in the `type` attribute of XML data arrays, e.g. `Float64`.
    pub fn vtk_name(self) -> &'static str {
        match self {
            ScalarType::U8 => "UInt8",
            ScalarType::I8 => "Int8",
            ScalarType::U16 => "UInt16",
            ScalarType::I16 => "Int16",
            ScalarType::U32 => "UInt32",
            ScalarType::I32 => "Int32",
            ScalarType::U64 => "UInt64",
            ScalarType::I64 => "Int64",
            ScalarType::F32 => "Float32",
            ScalarType::F64 => "Float64",
        }
    }

    pub fn from_vtk_name(name: &str) -> Option<ScalarType> {
        Some(match name {
            "UInt8" => ScalarType::U8,
            "Int8" => ScalarType::I8,
            "UInt16" => ScalarType::U16,
            "Int16" => ScalarType::I16,
            "UInt32" => ScalarType::U32,
            "Int32" => ScalarType::I32,
            "UInt64" => ScalarType::U64,
            "Int64" => ScalarType::I64,
            "Float32" => ScalarType::F32,
            "Float64" => ScalarType::F64,
            _ => return None,
        })
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.vtk_name())
    }
}

/// Numeric data of a single scalar type.
#[derive(Clone, PartialEq, Debug)]
pub enum IOBuffer {
    /// Vector of unsigned bytes.
    U8(Vec<u8>),
    /// Vector of signed bytes.
    I8(Vec<i8>),
    /// Vector of unsigned short integers `u16`.
    U16(Vec<u16>),
    /// Vector of signed short integers `i16`.
    I16(Vec<i16>),
    /// Vector of unsigned integers `u32`.
    U32(Vec<u32>),
    /// Vector of signed integers `i32`.
    I32(Vec<i32>),
    /// Vector of unsigned long integers `u64`.
    U64(Vec<u64>),
    /// Vector of signed long integers `i64`.
    I64(Vec<i64>),
    /// Vector of single precision floats.
    F32(Vec<f32>),
    /// Vector of double precision floats.
    F64(Vec<f64>),
}

impl Default for IOBuffer {
    fn default() -> IOBuffer {
        IOBuffer::F64(Vec::new())
    }
}

macro_rules! impl_io_buffer_convert {
    ($t:ident <=> $v:ident) => {
        impl From<Vec<$t>> for IOBuffer {
            fn from(v: Vec<$t>) -> IOBuffer {
                IOBuffer::$v(v)
            }
        }

        impl From<&[$t]> for IOBuffer {
            fn from(v: &[$t]) -> IOBuffer {
                IOBuffer::$v(v.to_vec())
            }
        }

        impl std::iter::FromIterator<$t> for IOBuffer {
            fn from_iter<T>(iter: T) -> Self
            where
                T: IntoIterator<Item = $t>,
            {
                iter.into_iter().collect::<Vec<$t>>().into()
            }
        }
    };
}

impl_io_buffer_convert!(u8 <=> U8);
impl_io_buffer_convert!(i8 <=> I8);
impl_io_buffer_convert!(u16 <=> U16);
impl_io_buffer_convert!(i16 <=> I16);
impl_io_buffer_convert!(u32 <=> U32);
impl_io_buffer_convert!(i32 <=> I32);
impl_io_buffer_convert!(u64 <=> U64);
impl_io_buffer_convert!(i64 <=> I64);
impl_io_buffer_convert!(f32 <=> F32);
impl_io_buffer_convert!(f64 <=> F64);

/// Evaluate the expression `$e` given a `Vec` `$v`.
#[macro_export]
macro_rules! match_buf {
    ($buf:expr; $v:pat => $e:expr) => {
        match $buf {
            $crate::model::IOBuffer::U8($v) => $e,
            $crate::model::IOBuffer::I8($v) => $e,
            $crate::model::IOBuffer::U16($v) => $e,
            $crate::model::IOBuffer::I16($v) => $e,
            $crate::model::IOBuffer::U32($v) => $e,
            $crate::model::IOBuffer::I32($v) => $e,
            $crate::model::IOBuffer::U64($v) => $e,
            $crate::model::IOBuffer::I64($v) => $e,
            $crate::model::IOBuffer::F32($v) => $e,
            $crate::model::IOBuffer::F64($v) => $e,
        }
    };
}

/// Evaluate `$e` for the `Vec` `$v` and wrap the result into the same variant.
macro_rules! map_buf {
    ($buf:expr; $v:ident => $e:expr) => {
        match $buf {
            IOBuffer::U8($v) => IOBuffer::U8($e),
            IOBuffer::I8($v) => IOBuffer::I8($e),
            IOBuffer::U16($v) => IOBuffer::U16($e),
            IOBuffer::I16($v) => IOBuffer::I16($e),
            IOBuffer::U32($v) => IOBuffer::U32($e),
            IOBuffer::I32($v) => IOBuffer::I32($e),
            IOBuffer::U64($v) => IOBuffer::U64($e),
            IOBuffer::I64($v) => IOBuffer::I64($e),
            IOBuffer::F32($v) => IOBuffer::F32($e),
            IOBuffer::F64($v) => IOBuffer::F64($e),
        }
    };
}

macro_rules! impl_bytes_constructor {
    ($bytes:ident, $bo:ident, $read:ident, $t:ident, $variant:ident) => {{
        use byteorder::ReadBytesExt;
        let mut out = vec![$t::zero(); $bytes.len() / std::mem::size_of::<$t>()];
        let mut reader = std::io::Cursor::new($bytes);
        let result = match $bo {
            ByteOrder::BigEndian => reader.$read::<byteorder::BE>(out.as_mut_slice()),
            ByteOrder::LittleEndian => reader.$read::<byteorder::LE>(out.as_mut_slice()),
        };
        result.map_err(|e| Error::Encoding(format!("invalid {} data: {}", stringify!($t), e)))?;
        Ok(IOBuffer::$variant(out))
    }};
}

macro_rules! impl_bytes_writer {
    ($v:ident, $bo:ident, $write:ident, $t:ident) => {{
        use byteorder::ByteOrder as _;
        let mut out = vec![0u8; $v.len() * std::mem::size_of::<$t>()];
        match $bo {
            ByteOrder::BigEndian => byteorder::BE::$write($v, &mut out),
            ByteOrder::LittleEndian => byteorder::LE::$write($v, &mut out),
        }
        out
    }};
}

impl IOBuffer {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            IOBuffer::U8(_) => ScalarType::U8,
            IOBuffer::I8(_) => ScalarType::I8,
            IOBuffer::U16(_) => ScalarType::U16,
            IOBuffer::I16(_) => ScalarType::I16,
            IOBuffer::U32(_) => ScalarType::U32,
            IOBuffer::I32(_) => ScalarType::I32,
            IOBuffer::U64(_) => ScalarType::U64,
            IOBuffer::I64(_) => ScalarType::I64,
            IOBuffer::F32(_) => ScalarType::F32,
            IOBuffer::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match_buf!(self; v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes occupied by the raw data.
    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.scalar_type().size()
    }

    /// Raw bytes of this buffer in the given byte order.
    pub fn to_bytes(&self, bo: ByteOrder) -> Vec<u8> {
        match self {
            IOBuffer::U8(v) => v.clone(),
            IOBuffer::I8(v) => cast_slice::<i8, u8>(v).to_vec(),
            IOBuffer::U16(v) => impl_bytes_writer!(v, bo, write_u16_into, u16),
            IOBuffer::I16(v) => impl_bytes_writer!(v, bo, write_i16_into, i16),
            IOBuffer::U32(v) => impl_bytes_writer!(v, bo, write_u32_into, u32),
            IOBuffer::I32(v) => impl_bytes_writer!(v, bo, write_i32_into, i32),
            IOBuffer::U64(v) => impl_bytes_writer!(v, bo, write_u64_into, u64),
            IOBuffer::I64(v) => impl_bytes_writer!(v, bo, write_i64_into, i64),
            IOBuffer::F32(v) => impl_bytes_writer!(v, bo, write_f32_into, f32),
            IOBuffer::F64(v) => impl_bytes_writer!(v, bo, write_f64_into, f64),
        }
    }

    /// Construct an `IOBuffer` from a `Vec` of bytes and a corresponding scalar type.
    pub fn from_bytes(bytes: Vec<u8>, scalar_type: ScalarType, bo: ByteOrder) -> Result<Self, Error> {
        if bytes.len() % scalar_type.size() != 0 {
            return Err(Error::Encoding(format!(
                "{} bytes do not form a whole number of {} values",
                bytes.len(),
                scalar_type
            )));
        }
        match scalar_type {
            ScalarType::U8 => Ok(IOBuffer::U8(bytes)),
            ScalarType::I8 => Ok(IOBuffer::I8(cast_slice::<u8, i8>(&bytes).to_vec())),
            ScalarType::U16 => impl_bytes_constructor!(bytes, bo, read_u16_into, u16, U16),
            ScalarType::I16 => impl_bytes_constructor!(bytes, bo, read_i16_into, i16, I16),
            ScalarType::U32 => impl_bytes_constructor!(bytes, bo, read_u32_into, u32, U32),
            ScalarType::I32 => impl_bytes_constructor!(bytes, bo, read_i32_into, i32, I32),
            ScalarType::U64 => impl_bytes_constructor!(bytes, bo, read_u64_into, u64, U64),
            ScalarType::I64 => impl_bytes_constructor!(bytes, bo, read_i64_into, i64, I64),
            ScalarType::F32 => impl_bytes_constructor!(bytes, bo, read_f32_into, f32, F32),
            ScalarType::F64 => impl_bytes_constructor!(bytes, bo, read_f64_into, f64, F64),
        }
    }

    /// Returns an iterator over elements with type `T`.
    ///
    /// If `T` does not match the stored scalar type, then `None` is returned.
    pub fn iter<T: Scalar>(&self) -> Option<std::slice::Iter<T>> {
        T::io_buf_vec_ref(self).map(|v| v.iter())
    }

    /// Converts this buffer into the underlying `Vec` representation.
    ///
    /// If `T` does not match the stored scalar type, then `None` is returned.
    pub fn into_vec<T: Scalar>(self) -> Option<Vec<T>> {
        T::io_buf_into_vec(self)
    }

    /// Numerically converts every element to `T`.
    ///
    /// Returns `None` if some value cannot be represented by `T`.
    pub fn cast_into<T: NumCast>(&self) -> Option<Vec<T>> {
        match_buf!(self; v => v.iter().map(|&x| T::from(x)).collect())
    }

    /// Converts the elements to the given scalar type.
    pub fn cast_to(&self, scalar_type: ScalarType) -> Option<IOBuffer> {
        if self.scalar_type() == scalar_type {
            return Some(self.clone());
        }
        Some(match scalar_type {
            ScalarType::U8 => IOBuffer::U8(self.cast_into()?),
            ScalarType::I8 => IOBuffer::I8(self.cast_into()?),
            ScalarType::U16 => IOBuffer::U16(self.cast_into()?),
            ScalarType::I16 => IOBuffer::I16(self.cast_into()?),
            ScalarType::U32 => IOBuffer::U32(self.cast_into()?),
            ScalarType::I32 => IOBuffer::I32(self.cast_into()?),
            ScalarType::U64 => IOBuffer::U64(self.cast_into()?),
            ScalarType::I64 => IOBuffer::I64(self.cast_into()?),
            ScalarType::F32 => IOBuffer::F32(self.cast_into()?),
            ScalarType::F64 => IOBuffer::F64(self.cast_into()?),
        })
    }

    /// Values at `range` as a new buffer of the same type.
    pub fn slice(&self, range: std::ops::Range<usize>) -> IOBuffer {
        map_buf!(self; v => v[range].to_vec())
    }

    /// Concatenates `other` to this buffer. Fails if the scalar types differ.
    pub fn extend_from(&mut self, other: &IOBuffer) -> Result<(), Error> {
        let expected = self.scalar_type();
        match (self, other) {
            (IOBuffer::U8(a), IOBuffer::U8(b)) => a.extend_from_slice(b),
            (IOBuffer::I8(a), IOBuffer::I8(b)) => a.extend_from_slice(b),
            (IOBuffer::U16(a), IOBuffer::U16(b)) => a.extend_from_slice(b),
            (IOBuffer::I16(a), IOBuffer::I16(b)) => a.extend_from_slice(b),
            (IOBuffer::U32(a), IOBuffer::U32(b)) => a.extend_from_slice(b),
            (IOBuffer::I32(a), IOBuffer::I32(b)) => a.extend_from_slice(b),
            (IOBuffer::U64(a), IOBuffer::U64(b)) => a.extend_from_slice(b),
            (IOBuffer::I64(a), IOBuffer::I64(b)) => a.extend_from_slice(b),
            (IOBuffer::F32(a), IOBuffer::F32(b)) => a.extend_from_slice(b),
            (IOBuffer::F64(a), IOBuffer::F64(b)) => a.extend_from_slice(b),
            (_, other) => {
                return Err(Error::Configuration(format!(
                    "cannot append {} values to a {} buffer",
                    other.scalar_type(),
                    expected
                )))
            }
        }
        Ok(())
    }

    /// Overwrites the values starting at `at` with `other`.
    pub fn write_at(&mut self, at: usize, other: &IOBuffer) -> Result<(), Error> {
        let (len, expected) = (self.len(), self.scalar_type());
        if at + other.len() > len {
            return Err(Error::Size(format!(
                "cannot write {} values at {} into a buffer of {} values",
                other.len(),
                at,
                len
            )));
        }
        let range = at..at + other.len();
        match (self, other) {
            (IOBuffer::U8(a), IOBuffer::U8(b)) => a[range].copy_from_slice(b),
            (IOBuffer::I8(a), IOBuffer::I8(b)) => a[range].copy_from_slice(b),
            (IOBuffer::U16(a), IOBuffer::U16(b)) => a[range].copy_from_slice(b),
            (IOBuffer::I16(a), IOBuffer::I16(b)) => a[range].copy_from_slice(b),
            (IOBuffer::U32(a), IOBuffer::U32(b)) => a[range].copy_from_slice(b),
            (IOBuffer::I32(a), IOBuffer::I32(b)) => a[range].copy_from_slice(b),
            (IOBuffer::U64(a), IOBuffer::U64(b)) => a[range].copy_from_slice(b),
            (IOBuffer::I64(a), IOBuffer::I64(b)) => a[range].copy_from_slice(b),
            (IOBuffer::F32(a), IOBuffer::F32(b)) => a[range].copy_from_slice(b),
            (IOBuffer::F64(a), IOBuffer::F64(b)) => a[range].copy_from_slice(b),
            (_, other) => {
                return Err(Error::Configuration(format!(
                    "cannot write {} values into a {} buffer",
                    other.scalar_type(),
                    expected
                )))
            }
        }
        Ok(())
    }

    /// A buffer of `len` zeros.
    pub fn zeros(scalar_type: ScalarType, len: usize) -> IOBuffer {
        map_buf!(IOBuffer::empty(scalar_type); v => {
            let mut v = v;
            v.resize(len, Zero::zero());
            v
        })
    }

    /// An empty buffer of the given type.
    pub fn empty(scalar_type: ScalarType) -> IOBuffer {
        match scalar_type {
            ScalarType::U8 => IOBuffer::U8(Vec::new()),
            ScalarType::I8 => IOBuffer::I8(Vec::new()),
            ScalarType::U16 => IOBuffer::U16(Vec::new()),
            ScalarType::I16 => IOBuffer::I16(Vec::new()),
            ScalarType::U32 => IOBuffer::U32(Vec::new()),
            ScalarType::I32 => IOBuffer::I32(Vec::new()),
            ScalarType::U64 => IOBuffer::U64(Vec::new()),
            ScalarType::I64 => IOBuffer::I64(Vec::new()),
            ScalarType::F32 => IOBuffer::F32(Vec::new()),
            ScalarType::F64 => IOBuffer::F64(Vec::new()),
        }
    }
}

pub trait Scalar
where
    Self: Sized,
{
    fn io_buf_vec_ref(io_buf: &IOBuffer) -> Option<&Vec<Self>>;
    fn io_buf_into_vec(io_buf: IOBuffer) -> Option<Vec<Self>>;
}

macro_rules! impl_scalar {
    ($t:ident, $v:ident) => {
        impl Scalar for $t {
            fn io_buf_vec_ref(io_buf: &IOBuffer) -> Option<&Vec<Self>> {
                match io_buf {
                    IOBuffer::$v(v) => Some(v),
                    _ => None,
                }
            }
            fn io_buf_into_vec(io_buf: IOBuffer) -> Option<Vec<Self>> {
                match io_buf {
                    IOBuffer::$v(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_scalar!(u8, U8);
impl_scalar!(i8, I8);
impl_scalar!(u16, U16);
impl_scalar!(i16, I16);
impl_scalar!(u32, U32);
impl_scalar!(i32, I32);
impl_scalar!(u64, U64);
impl_scalar!(i64, I64);
impl_scalar!(f32, F32);
impl_scalar!(f64, F64);

impl fmt::Display for IOBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match_buf!(self; v => {
            let mut iter = v.iter();
            if let Some(next) = iter.next() {
                write!(f, "{}", next)?;
                for i in iter {
                    write!(f, " {}", i)?;
                }
            }
        });
        Ok(())
    }
}

/// Component layout of a field.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FieldShape {
    Scalar,
    /// Vector with the given number of components.
    Vector(usize),
    /// Tensor with the given number of rows and columns, stored row-major.
    Tensor(usize, usize),
}

impl FieldShape {
    pub fn num_components(&self) -> usize {
        match *self {
            FieldShape::Scalar => 1,
            FieldShape::Vector(n) => n,
            FieldShape::Tensor(r, c) => r * c,
        }
    }
}

/// A typed array of tuples, one tuple per point or cell.
#[derive(Clone, PartialEq, Debug)]
pub struct Field {
    data: IOBuffer,
    shape: FieldShape,
}

impl Field {
    /// Creates a field, checking that `data` holds a whole number of tuples.
    pub fn new(data: impl Into<IOBuffer>, shape: FieldShape) -> Result<Field, Error> {
        let data = data.into();
        let num_comp = shape.num_components();
        if num_comp == 0 || data.len() % num_comp != 0 {
            return Err(Error::Size(format!(
                "{} values do not form tuples of {} components",
                data.len(),
                num_comp
            )));
        }
        Ok(Field { data, shape })
    }

    pub fn scalars(data: impl Into<IOBuffer>) -> Field {
        Field {
            data: data.into(),
            shape: FieldShape::Scalar,
        }
    }

    pub fn vectors(data: impl Into<IOBuffer>, dim: usize) -> Result<Field, Error> {
        Field::new(data, FieldShape::Vector(dim))
    }

    pub fn tensors(data: impl Into<IOBuffer>, rows: usize, cols: usize) -> Result<Field, Error> {
        Field::new(data, FieldShape::Tensor(rows, cols))
    }

    pub fn data(&self) -> &IOBuffer {
        &self.data
    }

    pub fn shape(&self) -> FieldShape {
        self.shape
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.data.scalar_type()
    }

    pub fn num_components(&self) -> usize {
        self.shape.num_components()
    }

    pub fn num_tuples(&self) -> usize {
        self.data.len() / self.num_components()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.size_in_bytes()
    }

    /// Returns the field with vectors padded to 3 and tensors padded to 3x3 components.
    ///
    /// VTK readers only interpret vectors and tensors with these layouts. Missing components are
    /// zero.
    pub fn to_vtk_layout(&self) -> Cow<'_, Field> {
        match self.shape {
            FieldShape::Vector(n) if n < 3 => Cow::Owned(Field {
                data: pad_tuples(&self.data, n, 3, |j| (j < n).then_some(j)),
                shape: FieldShape::Vector(3),
            }),
            FieldShape::Tensor(r, c) if r <= 3 && c <= 3 && (r, c) != (3, 3) => Cow::Owned(Field {
                data: pad_tuples(&self.data, r * c, 9, |j| {
                    let (row, col) = (j / 3, j % 3);
                    (row < r && col < c).then_some(row * c + col)
                }),
                shape: FieldShape::Tensor(3, 3),
            }),
            _ => Cow::Borrowed(self),
        }
    }
}

fn pad_tuples(
    data: &IOBuffer,
    in_comp: usize,
    out_comp: usize,
    source: impl Fn(usize) -> Option<usize>,
) -> IOBuffer {
    fn pad<T: Copy + Zero>(
        v: &[T],
        in_comp: usize,
        out_comp: usize,
        source: &dyn Fn(usize) -> Option<usize>,
    ) -> Vec<T> {
        let mut out = Vec::with_capacity(v.len() / in_comp * out_comp);
        for tuple in v.chunks(in_comp) {
            out.extend((0..out_comp).map(|j| source(j).map_or_else(T::zero, |i| tuple[i])));
        }
        out
    }
    map_buf!(data; v => pad(v, in_comp, out_comp, &source))
}

/// This enum describes the types of Cells representable by vtk files.
///
/// For more details on each of these types see, the [VTK file
/// formats](https://www.vtk.org/wp-content/uploads/2015/04/file-formats.pdf) documentation or
/// `vtkCell.h` in the vtk SDK.
#[derive(Copy, Clone, PartialEq, Eq, Debug, FromPrimitive)]
pub enum CellType {
    Vertex = 1,
    PolyVertex = 2,
    Line = 3,
    PolyLine = 4,
    Triangle = 5,
    TriangleStrip = 6,
    Polygon = 7,
    Pixel = 8,
    Quad = 9,
    Tetra = 10,
    Voxel = 11,
    Hexahedron = 12,
    Wedge = 13,
    Pyramid = 14,
    QuadraticEdge = 21,
    QuadraticTriangle = 22,
    QuadraticQuad = 23,
    QuadraticTetra = 24,
    QuadraticHexahedron = 25,
}

impl CellType {
    pub fn from_vtk_id(id: u8) -> Option<CellType> {
        num_traits::FromPrimitive::from_u8(id)
    }

    pub fn vtk_id(self) -> u8 {
        self as u8
    }
}

/// An extent for structured data specified as a triplet of inclusive ranges.
///
/// For example `[ x0..=x1, y0..=y1, z0..=z1 ]` gives the extent of a data set between `x0` and
/// `x1` in the `x` dimension and similar for `y` and `z`.
pub type RangeExtent = [RangeInclusive<i32>; 3];

/// The index-space extent of a structured grid or piece.
///
/// In XML, extents are given as a 6-tuple `x0 x1 y0 y1 z0 z1` of point indices.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Extent(pub RangeExtent);

impl Extent {
    /// Extent starting at the origin with the given number of cells per axis.
    pub fn from_cells(cells: [usize; 3]) -> Extent {
        Extent([0..=cells[0] as i32, 0..=cells[1] as i32, 0..=cells[2] as i32])
    }

    /// This extent shifted by `offset` points per axis.
    pub fn translated(&self, offset: [i32; 3]) -> Extent {
        let shift = |r: &RangeInclusive<i32>, o: i32| (r.start() + o)..=(r.end() + o);
        Extent([
            shift(&self.0[0], offset[0]),
            shift(&self.0[1], offset[1]),
            shift(&self.0[2], offset[2]),
        ])
    }

    /// Number of cells per axis.
    pub fn cells(&self) -> [usize; 3] {
        let dist = |r: &RangeInclusive<i32>| (r.end() - r.start()).max(0) as usize;
        [dist(&self.0[0]), dist(&self.0[1]), dist(&self.0[2])]
    }

    /// Compute the total number of points represented by this extent.
    pub fn num_points(&self) -> usize {
        self.cells().iter().map(|n| n + 1).product()
    }

    /// Compute the total number of cells represented by this extent.
    ///
    /// Axes without any cells (e.g. `z` in a 2D grid) do not contribute.
    pub fn num_cells(&self) -> usize {
        self.cells().iter().map(|&n| n.max(1)).product()
    }

    /// The smallest extent containing both `self` and `other`.
    pub fn union(&self, other: &Extent) -> Extent {
        let join = |a: &RangeInclusive<i32>, b: &RangeInclusive<i32>| {
            *a.start().min(b.start())..=*a.end().max(b.end())
        };
        Extent([
            join(&self.0[0], &other.0[0]),
            join(&self.0[1], &other.0[1]),
            join(&self.0[2], &other.0[2]),
        ])
    }
}

impl Default for Extent {
    /// The default extent is empty.
    fn default() -> Extent {
        Extent([0..=0, 0..=0, 0..=0])
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [x, y, z] = &self.0;
        write!(
            f,
            "{} {} {} {} {} {}",
            x.start(),
            x.end(),
            y.start(),
            y.end(),
            z.start(),
            z.end()
        )
    }
}

impl FromStr for Extent {
    type Err = Error;
    fn from_str(s: &str) -> Result<Extent, Error> {
        let values = s
            .split_whitespace()
            .map(|v| v.parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Parse(format!("invalid extent \"{}\": {}", s, e)))?;
        match values.as_slice() {
            &[x0, x1, y0, y1, z0, z1] => Ok(Extent([x0..=x1, y0..=y1, z0..=z1])),
            _ => Err(Error::Parse(format!(
                "extent \"{}\" must have 6 entries",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_buffer_iter() {
        let v = vec![1, 2, 3, 4];
        let buf = IOBuffer::U32(v);
        assert!(buf.iter::<u32>().is_some());
        assert!(buf.iter::<f32>().is_none());
    }

    #[test]
    fn io_buffer_into_vec() {
        let v = vec![1, 2, 3, 4];
        let buf = IOBuffer::U32(v.clone());
        assert!(buf.clone().into_vec::<f32>().is_none());
        assert_eq!(buf.into_vec::<u32>(), Some(v));
    }

    #[test]
    fn io_buffer_bytes() -> Result<(), Error> {
        let buf = IOBuffer::U16(vec![1, 258]);
        assert_eq!(buf.to_bytes(ByteOrder::LittleEndian), vec![1, 0, 2, 1]);
        assert_eq!(buf.to_bytes(ByteOrder::BigEndian), vec![0, 1, 1, 2]);
        let back = IOBuffer::from_bytes(vec![0, 1, 1, 2], ScalarType::U16, ByteOrder::BigEndian)?;
        assert_eq!(back, buf);
        assert!(IOBuffer::from_bytes(vec![0; 3], ScalarType::U16, ByteOrder::BigEndian).is_err());
        Ok(())
    }

    #[test]
    fn field_tuples() {
        let field = Field::vectors(vec![1.0f32, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(field.num_tuples(), 2);
        assert_eq!(field.size_in_bytes(), 16);
        assert!(matches!(
            Field::vectors(vec![1.0f32, 2.0, 3.0], 2),
            Err(Error::Size(_))
        ));
    }

    #[test]
    fn vtk_layout_pads_vectors_and_tensors() {
        let planar = Field::vectors(vec![1i32, 2, 3, 4], 2).unwrap();
        let vectors = planar.to_vtk_layout();
        assert_eq!(vectors.shape(), FieldShape::Vector(3));
        assert_eq!(vectors.data(), &IOBuffer::I32(vec![1, 2, 0, 3, 4, 0]));

        let small = Field::tensors(vec![1.0f64, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let tensors = small.to_vtk_layout();
        assert_eq!(tensors.shape(), FieldShape::Tensor(3, 3));
        assert_eq!(
            tensors.data(),
            &IOBuffer::F64(vec![1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0])
        );
    }

    #[test]
    fn extent_union_and_counts() {
        let a = Extent::from_cells([5, 5, 0]);
        let b = a.translated([5, 5, 0]);
        let whole = a.union(&b);
        assert_eq!(whole.to_string(), "0 10 0 10 0 0");
        assert_eq!(whole.num_points(), 121);
        assert_eq!(whole.num_cells(), 100);
        assert_eq!("0 10 0 10 0 0".parse::<Extent>().unwrap(), whole);
    }
}
