//! XDR (RFC 4506) encoding and decoding.
//!
//! Everything NFSv4 puts on the wire is XDR: big-endian 32/64-bit integers,
//! booleans as 4-byte integers, opaque data padded to a multiple of four
//! bytes, counted arrays, optionals as a presence flag, and discriminated
//! unions as a 32-bit discriminant followed by the selected arm.
//!
//! The codec is expressed as [`Serialize`]/[`Deserialize`] traits over
//! `io::Write`/`io::Read` so that it runs unchanged against sockets, plain
//! byte slices and the pooled buffers of [`crate::bufpool`]. Plain structs
//! are wired up with the `SerializeStruct!`/`DeserializeStruct!` macros;
//! unions and hot types (credentials, compound headers) carry hand-written
//! impls that dispatch on the discriminant and reject out-of-range values
//! with `InvalidData` — the `NFS4ERR_BADXDR` condition, which aborts the
//! connection.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};
use num_traits::ToPrimitive;

pub mod nfs4;
pub mod rpc;

/// XDR assumes big endian encoding.
pub type XdrEndian = BigEndian;

pub trait Serialize {
    /// Serializes the implementing type to the provided writer.
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

pub trait Deserialize {
    /// Deserializes data from the provided reader into the implementing type.
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Deserialization based on the [Default] value of the type T.
pub fn deserialize<T>(src: &mut impl Read) -> std::io::Result<T>
where
    T: Deserialize + Default,
{
    let mut val = T::default();
    val.deserialize(src)?;
    Ok(val)
}

/// Number of zero bytes required after `len` payload bytes to reach the
/// 4-byte XDR alignment.
pub fn pad(len: usize) -> usize {
    (4 - len % 4) % 4
}

pub(crate) fn write_padding(len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    const ZERO: [u8; 4] = [0; 4];
    dest.write_all(&ZERO[..pad(len)])
}

pub(crate) fn read_padding(len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let mut scratch = [0_u8; 4];
    src.read_exact(&mut scratch[..pad(len)])
}

pub fn invalid_data(m: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, m.into())
}

/// Reads a union discriminant and fails when it does not select a defined
/// arm. Every NFSv4 union decoder funnels through this check.
pub fn union_discriminant<R: Read>(src: &mut R, arms: u32) -> std::io::Result<u32> {
    let mut d: u32 = 0;
    d.deserialize(src)?;
    if d >= arms {
        return Err(invalid_data(format!("union discriminant {d} out of range")));
    }
    Ok(d)
}

/// XDR `bool` is the enum `{ FALSE = 0, TRUE = 1 }` and therefore occupies
/// four bytes.
impl Serialize for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XdrEndian>(u32::from(*self))
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match src.read_u32::<XdrEndian>()? {
            0 => *self = false,
            1 => *self = true,
            v => return Err(invalid_data(format!("invalid bool value {v}"))),
        }
        Ok(())
    }
}

/// XDR `int`.
impl Serialize for i32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XdrEndian>(*self)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i32::<XdrEndian>()?;
        Ok(())
    }
}

/// XDR `hyper`.
impl Serialize for i64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i64::<XdrEndian>(*self)
    }
}

impl Deserialize for i64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i64::<XdrEndian>()?;
        Ok(())
    }
}

/// XDR `unsigned int`.
impl Serialize for u32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XdrEndian>(*self)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XdrEndian>()?;
        Ok(())
    }
}

/// XDR `unsigned hyper`.
impl Serialize for u64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u64::<XdrEndian>(*self)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u64::<XdrEndian>()?;
        Ok(())
    }
}

/// XDR fixed-length opaque data: the bytes followed by padding.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)?;
        write_padding(N, dest)
    }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)?;
        read_padding(N, src)
    }
}

/// XDR fixed-length arrays of non-byte values: the elements in order, no
/// count prefix. Does not overlap the `[u8; N]` impl because `u8` itself
/// never implements the codec traits.
impl<T: Serialize, const N: usize> Serialize for [T; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        for item in self {
            item.serialize(dest)?;
        }
        Ok(())
    }
}

impl<T: Deserialize, const N: usize> Deserialize for [T; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        for item in self {
            item.deserialize(src)?;
        }
        Ok(())
    }
}

impl<T: Serialize + ?Sized> Serialize for Box<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        (**self).serialize(dest)
    }
}

impl<T: Deserialize> Deserialize for Box<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        (**self).deserialize(src)
    }
}

/// Object lengths in XDR are always serialized as [u32]. This wrapper
/// converts to and from the [usize] native to Rust collections.
#[derive(Default)]
struct UsizeAsU32(usize);

impl Serialize for UsizeAsU32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        let Some(val) = self.0.to_u32() else {
            return Err(invalid_data("length does not fit in u32"));
        };
        val.serialize(dest)
    }
}

impl Deserialize for UsizeAsU32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = deserialize::<u32>(src)? as usize;
        Ok(())
    }
}

/// XDR variable-length opaque data: a 4-byte length, the bytes, padding.
impl Serialize for [u8] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        UsizeAsU32(self.len()).serialize(dest)?;
        dest.write_all(self)?;
        write_padding(self.len(), dest)
    }
}

impl Serialize for Vec<u8> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_slice().serialize(dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = deserialize::<UsizeAsU32>(src)?.0;
        self.clear();
        self.resize(length, 0);
        src.read_exact(self)?;
        read_padding(length, src)
    }
}

/// XDR strings are variable-length opaque data holding UTF-8.
impl Serialize for str {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_bytes().serialize(dest)
    }
}

impl Serialize for String {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_str().serialize(dest)
    }
}

impl Deserialize for String {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let mut raw = Vec::new();
        raw.deserialize(src)?;
        match String::from_utf8(raw) {
            Ok(s) => {
                *self = s;
                Ok(())
            }
            Err(_) => Err(invalid_data("string is not valid UTF-8")),
        }
    }
}

/// XDR counted arrays: a 4-byte element count followed by the elements.
impl<T: Serialize> Serialize for [T] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        UsizeAsU32(self.len()).serialize(dest)?;
        for item in self {
            item.serialize(dest)?;
        }
        Ok(())
    }
}

impl<T: Serialize> Serialize for Vec<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_slice().serialize(dest)
    }
}

impl<T: Deserialize + Default> Deserialize for Vec<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = deserialize::<UsizeAsU32>(src)?.0;
        self.clear();
        for _ in 0..length {
            self.push(deserialize::<T>(src)?);
        }
        Ok(())
    }
}

/// XDR optional data: a 4-byte presence flag, then the value if present.
impl<T: Serialize> Serialize for Option<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            Some(data) => {
                true.serialize(dest)?;
                data.serialize(dest)
            }
            None => false.serialize(dest),
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Option<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = if deserialize::<bool>(src)? {
            Some(deserialize::<T>(src)?)
        } else {
            None
        };
        Ok(())
    }
}

/// Implements [`Serialize`] for a struct by serializing each named field in
/// declaration order, which is exactly the XDR struct encoding.
#[macro_export]
macro_rules! SerializeStruct {
    ($t:ident, $($element:ident),*) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: ::std::io::Write>(&self, dest: &mut W) -> ::std::io::Result<()> {
                $(self.$element.serialize(dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`Deserialize`] for a struct field by field.
#[macro_export]
macro_rules! DeserializeStruct {
    ($t:ident, $($element:ident),*) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: ::std::io::Read>(&mut self, src: &mut R) -> ::std::io::Result<()> {
                $(self.$element.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

/// Implements both codec traits for a `#[repr(u32)]` fieldless enum carrying
/// `FromPrimitive`/`ToPrimitive`. Unknown values fail with `InvalidData`.
#[macro_export]
macro_rules! XdrEnum {
    ($t:ident) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: ::std::io::Write>(&self, dest: &mut W) -> ::std::io::Result<()> {
                use num_traits::ToPrimitive;
                match self.to_u32() {
                    Some(v) => v.serialize(dest),
                    None => Err($crate::protocol::xdr::invalid_data("enum value out of range")),
                }
            }
        }

        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: ::std::io::Read>(&mut self, src: &mut R) -> ::std::io::Result<()> {
                use num_traits::FromPrimitive;
                let v = $crate::protocol::xdr::deserialize::<u32>(src)?;
                match Self::from_u32(v) {
                    Some(e) => {
                        *self = e;
                        Ok(())
                    }
                    None => Err($crate::protocol::xdr::invalid_data(format!(
                        "invalid {} value {v}",
                        stringify!($t)
                    ))),
                }
            }
        }
    };
}

/// Serialized size of a value, used by the READDIR byte budgeting.
pub fn size_of<T: Serialize>(value: &T) -> std::io::Result<usize> {
    let mut buf = Vec::new();
    value.serialize(&mut buf)?;
    Ok(buf.len())
}

pub use crate::DeserializeStruct;
pub use crate::SerializeStruct;
pub use crate::XdrEnum;
