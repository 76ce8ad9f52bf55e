// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-written TL serialization for the small, fixed set of control and
//! handshake structures the session engine and auth-key negotiator speak
//! natively. The generated business-logic schema (the bulk of Telegram's
//! API surface) is out of scope; callers plug their own serialized request
//! bytes in as an opaque `Vec<u8>` and get an opaque `Vec<u8>` back.

pub mod control;
pub mod cursor;

pub use cursor::{Cursor, DeserializeError};

/// A type that can serialize itself into the TL binary wire format.
pub trait Serializable {
    fn serialize(&self, buf: &mut Vec<u8>);
}

/// A type that can be parsed back out of the TL binary wire format.
pub trait Deserializable: Sized {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError>;
}

/// A boxed TL object's constructor id, used to tag the wire representation
/// and to dispatch on when reading one of several possible types back.
pub trait Identifiable {
    const CONSTRUCTOR_ID: u32;
}

/// A generated business-logic request or response type, as produced by a
/// full TL schema compiler. This crate never generates or hand-writes the
/// thousands of concrete `TlObject` implementors Telegram's API exposes
/// (that's explicitly out of scope); it only needs the boundary this
/// trait describes, so that a caller's pre-serialized request can be
/// handed to the session engine as an opaque, self-identifying byte body.
pub trait TlObject: Serializable {
    /// The boxed constructor id this object serializes with, i.e. the
    /// first four bytes `Serializable::serialize` writes out.
    fn identifier(&self) -> u32;
}

impl<T: Identifiable + Serializable> TlObject for T {
    fn identifier(&self) -> u32 {
        Self::CONSTRUCTOR_ID
    }
}

macro_rules! impl_int {
    ($t:ty, $read:ident) => {
        impl Serializable for $t {
            fn serialize(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }
        }

        impl Deserializable for $t {
            fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
                cursor.$read()
            }
        }
    };
}

impl_int!(i32, read_i32);
impl_int!(u32, read_u32);
impl_int!(i64, read_i64);
impl_int!(u64, read_u64);

impl Serializable for bool {
    fn serialize(&self, buf: &mut Vec<u8>) {
        // boolTrue#997275b5, boolFalse#bc799737
        let id: u32 = if *self { 0x997275b5 } else { 0xbc799737 };
        id.serialize(buf);
    }
}

impl Deserializable for bool {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        match cursor.read_u32()? {
            0x997275b5 => Ok(true),
            0xbc799737 => Ok(false),
            id => Err(DeserializeError::UnexpectedConstructor { id }),
        }
    }
}

impl<const N: usize> Serializable for [u8; N] {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl<const N: usize> Deserializable for [u8; N] {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.read_raw::<N>()
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut Vec<u8>) {
        cursor::write_tl_bytes(buf, self);
    }
}

impl Deserializable for Vec<u8> {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        cursor.read_tl_bytes()
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut Vec<u8>) {
        cursor::write_tl_bytes(buf, self.as_bytes());
    }
}

impl Deserializable for String {
    fn deserialize(cursor: &mut Cursor) -> Result<Self, DeserializeError> {
        String::from_utf8(cursor.read_tl_bytes()?)
            .map_err(|_| DeserializeError::UnexpectedConstructor { id: 0 })
    }
}

/// A TL "vector" (bare, not boxed): a 4-byte length followed by that many
/// serialized elements. Boxed vectors (with the `0x1cb5c415` marker) are
/// only used where a specific control message calls for one explicitly.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).serialize(buf);
        self.iter().for_each(|item| item.serialize(buf));
    }
}

pub fn write_vector<T: Serializable>(items: &[T], buf: &mut Vec<u8>) {
    (items.len() as u32).serialize(buf);
    items.iter().for_each(|item| item.serialize(buf));
}

pub fn read_vector<T: Deserializable>(cursor: &mut Cursor) -> Result<Vec<T>, DeserializeError> {
    let len = cursor.read_u32()? as usize;
    (0..len).map(|_| T::deserialize(cursor)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut buf = Vec::new();
        42i32.serialize(&mut buf);
        (-7i64).serialize(&mut buf);
        true.serialize(&mut buf);

        let mut cursor = Cursor::new(&buf);
        assert_eq!(i32::deserialize(&mut cursor).unwrap(), 42);
        assert_eq!(i64::deserialize(&mut cursor).unwrap(), -7);
        assert_eq!(bool::deserialize(&mut cursor).unwrap(), true);
    }

    #[test]
    fn round_trips_bytes_and_string() {
        let mut buf = Vec::new();
        vec![1u8, 2, 3].serialize(&mut buf);
        "hello".to_string().serialize(&mut buf);

        let mut cursor = Cursor::new(&buf);
        assert_eq!(Vec::<u8>::deserialize(&mut cursor).unwrap(), vec![1, 2, 3]);
        assert_eq!(String::deserialize(&mut cursor).unwrap(), "hello");
    }
}
