//! Piece identifiers.
//!
//! Objects are addressed by a PieceCIDv2: a CIDv1 with the `raw` codec whose
//! multihash is `fr32-sha256-trunc254-padbintree`. The digest carries the
//! tree height and the amount of padding next to the root, so the payload
//! size of an object can be recovered from its identifier alone.

use crate::fr32;
use crate::hash::{Node, PieceHasher};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CID version byte.
const CID_VERSION: u64 = 1;

/// Multicodec for raw binary payloads.
const RAW_CODEC: u64 = 0x55;

/// Multihash code for `fr32-sha256-trunc254-padbintree`.
const PIECE_MULTIHASH: u64 = 0x1011;

/// Multibase prefix for lowercase RFC 4648 base32 without padding.
const MULTIBASE_BASE32: char = 'b';

/// Largest tree height whose padded size still fits in a u64.
const MAX_HEIGHT: u8 = 58;

/// Content identifier of a stored object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceCid {
    padding: u64,
    height: u8,
    root: Node,
}

impl PieceCid {
    /// Compute the identifier of a complete in-memory payload.
    pub fn compute(data: &[u8]) -> Result<Self> {
        let mut hasher = PieceHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    pub(crate) fn from_parts(payload_size: u64, height: u8, root: Node) -> Self {
        let padded = 32u64 << height;
        let padding = padded / 128 * 127 - payload_size;
        Self {
            padding,
            height,
            root,
        }
    }

    /// Root of the piece tree.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Height of the piece tree (log2 of the leaf count).
    pub fn height(&self) -> u8 {
        self.height
    }

    /// Padded piece size in bytes.
    pub fn padded_size(&self) -> u64 {
        32u64 << self.height
    }

    /// Size of the original payload in bytes.
    pub fn payload_size(&self) -> u64 {
        self.padded_size() / 128 * 127 - self.padding
    }

    /// Object store key holding the payload.
    pub fn object_key(&self) -> String {
        format!("pieces/{self}")
    }

    /// Object store key holding the JSON record.
    pub fn record_key(&self) -> String {
        format!("records/{self}.json")
    }

    fn digest(&self) -> Vec<u8> {
        let mut digest = Vec::with_capacity(10 + 1 + 32);
        write_uvarint(&mut digest, self.padding);
        digest.push(self.height);
        digest.extend_from_slice(&self.root);
        digest
    }

    /// Binary CID representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let digest = self.digest();
        let mut out = Vec::with_capacity(digest.len() + 8);
        write_uvarint(&mut out, CID_VERSION);
        write_uvarint(&mut out, RAW_CODEC);
        write_uvarint(&mut out, PIECE_MULTIHASH);
        write_uvarint(&mut out, digest.len() as u64);
        out.extend_from_slice(&digest);
        out
    }

    /// Parse the binary CID representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;

        let version = read_uvarint(&mut cursor)?;
        if version != CID_VERSION {
            return Err(invalid(format!("unsupported CID version {version}")));
        }
        let codec = read_uvarint(&mut cursor)?;
        if codec != RAW_CODEC {
            return Err(invalid(format!("unexpected codec 0x{codec:x}")));
        }
        let code = read_uvarint(&mut cursor)?;
        if code != PIECE_MULTIHASH {
            return Err(invalid(format!("unexpected multihash 0x{code:x}")));
        }
        let len = read_uvarint(&mut cursor)?;
        if len != cursor.len() as u64 {
            return Err(invalid(format!(
                "digest length {len} does not match remaining {} bytes",
                cursor.len()
            )));
        }

        let padding = read_uvarint(&mut cursor)?;
        let [height, root @ ..] = cursor else {
            return Err(invalid("truncated digest"));
        };
        let root: Node = root
            .try_into()
            .map_err(|_| invalid(format!("expected 32 byte root, got {}", root.len())))?;

        if *height < 2 || *height > MAX_HEIGHT {
            return Err(invalid(format!("tree height {height} out of range")));
        }
        if root[31] & 0xc0 != 0 {
            return Err(invalid("root is not a truncated node"));
        }
        let capacity = (32u64 << height) / 128 * 127;
        if padding >= capacity {
            return Err(invalid(format!(
                "padding {padding} leaves no payload in a piece of height {height}"
            )));
        }
        // A smaller tree would have held the payload.
        let cid = Self {
            padding,
            height: *height,
            root,
        };
        if fr32::padded_piece_size(cid.payload_size()) != cid.padded_size() {
            return Err(invalid("padding does not match tree height"));
        }

        Ok(cid)
    }
}

impl FromStr for PieceCid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(encoded) = s.strip_prefix(MULTIBASE_BASE32) else {
            return Err(invalid("expected base32 multibase prefix 'b'"));
        };
        if encoded.is_empty() || encoded.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid("expected lowercase base32"));
        }
        let bytes = base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            &encoded.to_ascii_uppercase(),
        )
        .ok_or_else(|| invalid("malformed base32"))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = base32::encode(
            base32::Alphabet::Rfc4648 { padding: false },
            &self.to_bytes(),
        );
        write!(f, "{MULTIBASE_BASE32}{}", encoded.to_ascii_lowercase())
    }
}

impl fmt::Debug for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceCid({self})")
    }
}

impl Serialize for PieceCid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PieceCid {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidIdentifier(msg.into())
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_uvarint(cursor: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for (i, byte) in cursor.iter().enumerate().take(10) {
        let bits = u64::from(byte & 0x7f);
        if i == 9 && *byte > 1 {
            return Err(invalid("varint overflows u64"));
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            if i > 0 && *byte == 0 {
                return Err(invalid("varint is not minimally encoded"));
            }
            *cursor = &cursor[i + 1..];
            return Ok(value);
        }
    }
    Err(invalid("truncated varint"))
}
