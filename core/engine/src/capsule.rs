//! Self-describing capsule format.
//!
//! # Format
//! - Magic `KYNC` (4 bytes) + version (1 byte)
//! - Item id length (1 byte) + item id (UTF-8)
//! - Per-capsule key salt (32 bytes)
//! - Body length (8 bytes, little endian) + body
//!
//! The body is `nonce || ciphertext || tag`. Everything before the body is
//! authenticated as associated data, so `recover` can trust the embedded
//! item id once the tag verifies and never needs the original config.

use kync_common::{ItemId, KyncError, Result};
use kync_crypto::{Salt, SALT_LENGTH, SEAL_OVERHEAD};

/// Capsule magic bytes.
pub const MAGIC: &[u8; 4] = b"KYNC";

/// Current capsule format version.
pub const CAPSULE_VERSION: u8 = 1;

/// Header bytes excluding the item id: magic, version, id length, salt, body length.
pub const HEADER_FIXED: usize = 4 + 1 + 1 + SALT_LENGTH + 8;

/// Maximum bytes a capsule adds to the protected data for items up to `max_item_len`.
pub fn overhead(max_item_len: usize) -> usize {
    HEADER_FIXED + max_item_len + SEAL_OVERHEAD
}

/// Decoded capsule header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleHeader {
    /// Item that sealed the capsule.
    pub item: ItemId,
    /// Salt of the per-capsule key.
    pub salt: Salt,
    /// Length of the sealed body.
    pub body_len: u64,
}

impl CapsuleHeader {
    /// Serialize the header; the result doubles as AEAD associated data.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let item_len = u8::try_from(self.item.len()).map_err(|_| {
            KyncError::InternalError("Item id too long for capsule header".to_string())
        })?;

        let mut header = Vec::with_capacity(HEADER_FIXED + self.item.len());
        header.extend_from_slice(MAGIC);
        header.push(CAPSULE_VERSION);
        header.push(item_len);
        header.extend_from_slice(self.item.as_bytes());
        header.extend_from_slice(self.salt.as_bytes());
        header.extend_from_slice(&self.body_len.to_le_bytes());
        Ok(header)
    }
}

/// A parsed capsule borrowing its input.
#[derive(Debug)]
pub struct Capsule<'a> {
    header: CapsuleHeader,
    header_bytes: &'a [u8],
    body: &'a [u8],
}

impl<'a> Capsule<'a> {
    /// Parse and validate a capsule.
    ///
    /// # Errors
    /// - `MalformedCapsule` on wrong magic or version, invalid item id,
    ///   truncated fields, a body length that disagrees with the remaining
    ///   bytes, or a body too short to hold nonce and tag
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        if reader.take(MAGIC.len())? != MAGIC {
            return Err(malformed("bad magic"));
        }
        let version = reader.byte()?;
        if version != CAPSULE_VERSION {
            return Err(malformed(&format!("unsupported version {}", version)));
        }

        let item_len = usize::from(reader.byte()?);
        let item = ItemId::from_bytes(reader.take(item_len)?)
            .map_err(|_| malformed("invalid item id"))?;

        let salt: [u8; SALT_LENGTH] = reader
            .take(SALT_LENGTH)?
            .try_into()
            .map_err(|_| malformed("truncated salt"))?;

        let body_len_bytes: [u8; 8] = reader
            .take(8)?
            .try_into()
            .map_err(|_| malformed("truncated length"))?;
        let body_len = u64::from_le_bytes(body_len_bytes);

        let header_len = reader.position();
        let body = reader.rest();
        if body.len() as u64 != body_len {
            return Err(malformed("body length mismatch"));
        }
        if body.len() < SEAL_OVERHEAD {
            return Err(malformed("body too short"));
        }

        Ok(Self {
            header: CapsuleHeader {
                item,
                salt: Salt::from_bytes(salt),
                body_len,
            },
            header_bytes: &bytes[..header_len],
            body,
        })
    }

    /// The decoded header.
    pub fn header(&self) -> &CapsuleHeader {
        &self.header
    }

    /// The raw header bytes (associated data).
    pub fn header_bytes(&self) -> &'a [u8] {
        self.header_bytes
    }

    /// The sealed body.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }
}

fn malformed(reason: &str) -> KyncError {
    KyncError::MalformedCapsule(reason.to_string())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| malformed("truncated capsule"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
