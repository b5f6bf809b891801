use crate::jvm::{Error, MalformedKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()>;
}

/// Counterpart of [`Serialize`] for reading class file constructs back out of a byte stream
///
/// Running out of input is reported as [`MalformedKind::Truncated`] rather than as an I/O error.
pub trait Deserialize: Sized {
    /// Read the construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error>;
}

/// Map an I/O failure while reading class bytes into the right error
pub fn read_error(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::MalformedClass(MalformedKind::Truncated)
    } else {
        Error::IoError(err)
    }
}

/// Read exactly `len` raw bytes
pub fn read_bytes<R: ReadBytesExt>(reader: &mut R, len: usize) -> Result<Vec<u8>, Error> {
    let mut buffer = vec![0; len];
    reader.read_exact(&mut buffer).map_err(read_error)?;
    Ok(buffer)
}

macro_rules! primitive_binary_format {
    ($typ:ty, $write:ident, $read:ident) => {
        impl Serialize for $typ {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }

        impl Deserialize for $typ {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
                reader.$read::<BigEndian>().map_err(read_error)
            }
        }
    };
}

primitive_binary_format!(u16, write_u16, read_u16);
primitive_binary_format!(u32, write_u32, read_u32);
primitive_binary_format!(u64, write_u64, read_u64);
primitive_binary_format!(i16, write_i16, read_i16);
primitive_binary_format!(i32, write_i32, read_i32);
primitive_binary_format!(i64, write_i64, read_i64);
primitive_binary_format!(f32, write_f32, read_f32);
primitive_binary_format!(f64, write_f64, read_f64);

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        reader.read_u8().map_err(read_error)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i8(*self)
    }
}

impl Deserialize for i8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        reader.read_i8().map_err(read_error)
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let len = u16::deserialize(reader)?;
        let mut elems = Vec::with_capacity(len as usize);
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_primitives() {
        let mut bytes = vec![];
        0xCAFEu16.serialize(&mut bytes).unwrap();
        (-2i32).serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0xCA, 0xFE, 0xFF, 0xFF, 0xFF, 0xFE]);

        let mut reader = &bytes[..];
        assert_eq!(u16::deserialize(&mut reader).unwrap(), 0xCAFE);
        assert_eq!(i32::deserialize(&mut reader).unwrap(), -2);
    }

    #[test]
    fn sequences_are_length_prefixed() {
        let mut bytes = vec![];
        vec![1u16, 2, 3].serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0, 3, 0, 1, 0, 2, 0, 3]);
        assert_eq!(Vec::<u16>::deserialize(&mut &bytes[..]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn running_out_of_input_is_truncation() {
        let bytes = [0u8, 3, 0, 1];
        assert!(matches!(
            Vec::<u16>::deserialize(&mut &bytes[..]),
            Err(Error::MalformedClass(MalformedKind::Truncated))
        ));
    }
}
