// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    key::CacheKey,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::sync::Arc;

const DOC_MAGIC: u32 = 0x5F12_9B13;

pub(crate) const DOC_VERSION_MAJOR: u16 = 1;
pub(crate) const DOC_VERSION_MINOR: u16 = 0;

const DOC_FLAG_SINGLE_FRAGMENT: u8 = 0x01;

/// Payload kind carried by a doc block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DocType {
    /// HTTP object data
    #[default]
    Http,

    /// Untyped data
    Raw,
}

impl From<DocType> for u8 {
    fn from(value: DocType) -> Self {
        match value {
            DocType::Http => 0,
            DocType::Raw => 1,
        }
    }
}

impl TryFrom<u8> for DocType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Http),
            1 => Ok(Self::Raw),
            _ => Err(()),
        }
    }
}

/// Validation outcome of a decoded block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocMagic {
    /// Magic and checksum are good
    Alive,

    /// Magic is good but the payload checksum does not match
    Corrupt,
}

/// One on-disk object block.
///
/// Every block starts with a fixed header, followed by the marshaled
/// alternate vector (`hdr`, present on head blocks only), followed by
/// fragment payload. The magic and payload checksum are validated on
/// every read.
#[derive(Clone, Debug)]
pub struct Doc {
    /// Validation state, [`DocMagic::Alive`] unless the checksum failed.
    pub magic: DocMagic,

    /// Object key of the owning object.
    pub first_key: CacheKey,

    /// Key of this block's fragment.
    pub key: CacheKey,

    /// Payload kind.
    pub doc_type: DocType,

    /// Total object length, when known.
    pub total_len: u64,

    /// The object fits entirely in this block.
    pub single_fragment: bool,

    /// Volume sync counter at write time.
    pub sync_serial: u32,

    /// Aggregation write counter at write time.
    pub write_serial: u32,

    /// Marshaled alternate vector (head blocks only).
    pub hdr: Vec<u8>,

    /// Fragment payload.
    pub data: Arc<[u8]>,
}

impl Doc {
    /// Builds a block ready for encoding.
    #[must_use]
    pub fn new(first_key: CacheKey, key: CacheKey, hdr: Vec<u8>, data: Arc<[u8]>) -> Self {
        Self {
            magic: DocMagic::Alive,
            first_key,
            key,
            doc_type: DocType::Http,
            total_len: 0,
            single_fragment: false,
            sync_serial: 0,
            write_serial: 0,
            hdr,
            data,
        }
    }

    /// Length of the marshaled alternate vector.
    #[must_use]
    pub fn hlen(&self) -> u32 {
        // NOTE: Truncation is okay, header blocks are small
        #[allow(clippy::cast_possible_truncation)]
        let hlen = self.hdr.len() as u32;
        hlen
    }

    /// Payload length.
    #[must_use]
    pub fn data_len(&self) -> u64 {
        self.data.len() as u64
    }
}

fn payload_checksum(data: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(data)
}

impl Encode for Doc {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(DOC_MAGIC)?;
        writer.write_u16::<BigEndian>(DOC_VERSION_MAJOR)?;
        writer.write_u16::<BigEndian>(DOC_VERSION_MINOR)?;

        self.first_key.encode_into(writer)?;
        self.key.encode_into(writer)?;

        writer.write_u8(self.doc_type.into())?;

        let mut flags = 0u8;
        if self.single_fragment {
            flags |= DOC_FLAG_SINGLE_FRAGMENT;
        }
        writer.write_u8(flags)?;

        writer.write_u64::<BigEndian>(self.total_len)?;
        writer.write_u32::<BigEndian>(self.sync_serial)?;
        writer.write_u32::<BigEndian>(self.write_serial)?;

        writer.write_u32::<BigEndian>(self.hlen())?;
        writer.write_all(&self.hdr)?;

        writer.write_u64::<BigEndian>(self.data_len())?;
        writer.write_u64::<BigEndian>(payload_checksum(&self.data))?;
        writer.write_all(&self.data)?;

        Ok(())
    }
}

impl Decode for Doc {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let magic = reader.read_u32::<BigEndian>()?;
        if magic != DOC_MAGIC {
            return Err(DecodeError::InvalidMagic("Doc"));
        }

        let major = reader.read_u16::<BigEndian>()?;
        let _minor = reader.read_u16::<BigEndian>()?;
        if major != DOC_VERSION_MAJOR {
            return Err(DecodeError::InvalidMagic("Doc"));
        }

        let first_key = CacheKey::decode_from(reader)?;
        let key = CacheKey::decode_from(reader)?;

        let doc_type = reader.read_u8()?;
        let doc_type =
            DocType::try_from(doc_type).map_err(|()| DecodeError::InvalidTag(("Doc", doc_type)))?;

        let flags = reader.read_u8()?;
        let total_len = reader.read_u64::<BigEndian>()?;
        let sync_serial = reader.read_u32::<BigEndian>()?;
        let write_serial = reader.read_u32::<BigEndian>()?;

        let hlen = reader.read_u32::<BigEndian>()?;
        let mut hdr = vec![0; hlen as usize];
        reader.read_exact(&mut hdr)?;

        let data_len = reader.read_u64::<BigEndian>()?;
        let checksum = reader.read_u64::<BigEndian>()?;
        // NOTE: Truncation is okay, a fragment always fits in memory
        #[allow(clippy::cast_possible_truncation)]
        let mut data = vec![0; data_len as usize];
        reader.read_exact(&mut data)?;

        let magic = if payload_checksum(&data) == checksum {
            DocMagic::Alive
        } else {
            DocMagic::Corrupt
        };

        Ok(Self {
            magic,
            first_key,
            key,
            doc_type,
            total_len,
            single_fragment: (flags & DOC_FLAG_SINGLE_FRAGMENT) != 0,
            sync_serial,
            write_serial,
            hdr,
            data: data.into(),
        })
    }
}
