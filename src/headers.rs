// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Lifecycle magic carried by marshaled header sets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeaderMagic {
    /// Live in-memory instance
    Alive,

    /// Serialized form as written to disk
    Marshaled,

    /// Recognizably damaged
    Corrupt,

    /// Destroyed instance
    Dead,
}

impl From<HeaderMagic> for u32 {
    fn from(value: HeaderMagic) -> Self {
        match value {
            HeaderMagic::Alive => 0xa1a1_a1a1,
            HeaderMagic::Marshaled => 0xdcba_4321,
            HeaderMagic::Corrupt => 0xbadb_adca,
            HeaderMagic::Dead => 0xdead_dead,
        }
    }
}

impl TryFrom<u32> for HeaderMagic {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0xa1a1_a1a1 => Ok(Self::Alive),
            0xdcba_4321 => Ok(Self::Marshaled),
            0xbadb_adca => Ok(Self::Corrupt),
            0xdead_dead => Ok(Self::Dead),
            _ => Err(()),
        }
    }
}

/// One parsed HTTP header set as the cache observes it.
///
/// Only the pieces the cache core consumes are modeled: a start line
/// fragment (request target or response status) and the field list.
/// Transport framing, trailers etc. stay with the HTTP front end.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HttpHeader {
    /// Request target, or the status code rendered as text for responses.
    pub start: String,

    fields: Vec<(String, String)>,
}

impl HttpHeader {
    /// Creates an empty header set with the given start line fragment.
    #[must_use]
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            fields: Vec::new(),
        }
    }

    /// Appends or replaces a field.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();

        if let Some(slot) = self
            .fields
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            slot.1 = value;
        } else {
            self.fields.push((name.to_owned(), value));
        }
    }

    /// Case-insensitive field lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `Content-Type` field value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    /// Parsed `Content-Length` field value.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.get("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// `Range` field value.
    #[must_use]
    pub fn range(&self) -> Option<&str> {
        self.get("Range")
    }
}

impl Encode for HttpHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(HeaderMagic::Marshaled.into())?;

        // NOTE: Truncation is okay, start lines and field counts are small
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.start.len() as u16)?;
        writer.write_all(self.start.as_bytes())?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.fields.len() as u16)?;

        for (name, value) in &self.fields {
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u16::<BigEndian>(name.len() as u16)?;
            writer.write_all(name.as_bytes())?;

            #[allow(clippy::cast_possible_truncation)]
            writer.write_u32::<BigEndian>(value.len() as u32)?;
            writer.write_all(value.as_bytes())?;
        }

        Ok(())
    }
}

impl Decode for HttpHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let magic = reader.read_u32::<BigEndian>()?;

        if HeaderMagic::try_from(magic) != Ok(HeaderMagic::Marshaled) {
            return Err(DecodeError::InvalidMagic("HttpHeader"));
        }

        let start_len = reader.read_u16::<BigEndian>()?;
        let start = read_string(reader, start_len as usize, "HttpHeader::start")?;

        let count = reader.read_u16::<BigEndian>()?;
        let mut fields = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let name_len = reader.read_u16::<BigEndian>()?;
            let name = read_string(reader, name_len as usize, "HttpHeader::name")?;

            let value_len = reader.read_u32::<BigEndian>()?;
            let value = read_string(reader, value_len as usize, "HttpHeader::value")?;

            fields.push((name, value));
        }

        Ok(Self { start, fields })
    }
}

fn read_string<R: Read>(
    reader: &mut R,
    len: usize,
    what: &'static str,
) -> Result<String, DecodeError> {
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| DecodeError::InvalidMagic(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_is_case_insensitive() {
        let mut hdr = HttpHeader::new("200");
        hdr.set("Content-Type", "text/plain");
        assert_eq!(Some("text/plain"), hdr.get("content-type"));
        assert_eq!(Some("text/plain"), hdr.content_type());

        hdr.set("content-type", "text/html");
        assert_eq!(1, hdr.len());
        assert_eq!(Some("text/html"), hdr.content_type());
    }

    #[test]
    fn roundtrip() -> crate::Result<()> {
        let mut hdr = HttpHeader::new("GET /object");
        hdr.set("Host", "example.com");
        hdr.set("Accept-Encoding", "gzip");

        let bytes = hdr.encode_into_vec()?;
        let back = HttpHeader::decode_from(&mut &bytes[..])?;
        assert_eq!(hdr, back);
        Ok(())
    }

    #[test]
    fn rejects_bad_magic() {
        let mut hdr = HttpHeader::new("200");
        hdr.set("Content-Length", "12");

        let mut bytes = hdr.encode_into_vec().expect("encode");
        bytes[0] ^= 0xff;
        assert!(HttpHeader::decode_from(&mut &bytes[..]).is_err());
    }
}
