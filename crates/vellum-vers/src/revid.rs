//! Opaque revision identifiers.
//!
//! Two binary shapes coexist in storage:
//!
//! * *Tree* revIDs (leading byte != 0): a generation varint followed by a
//!   digest, rendered in ASCII as `hex(generation) "-" hex(digest)`.
//! * *Version-vector* revIDs (leading byte 0): the binary form of a
//!   [`VersionVector`], rendered in ASCII as comma-separated versions.
//!
//! An empty `RevId` is the "never saved" state.

use std::fmt;

use vellum_error::{Result, VellumError};
use vellum_types::varint::{read_uvarint, write_uvarint};

use crate::vector::VersionVector;
use crate::version::{Generation, PeerId, Version};

/// An owned revision-ID byte string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RevId {
    bytes: Vec<u8>,
}

fn bad(detail: &str) -> VellumError {
    VellumError::bad_revision(detail.to_owned())
}

impl RevId {
    /// The empty ("never saved") revision ID.
    pub fn none() -> Self {
        Self::default()
    }

    /// Wrap raw revision-ID bytes without validating them.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Build a tree revID from a generation and digest.
    pub fn tree(generation: Generation, digest: &[u8]) -> Self {
        debug_assert!(generation >= 1);
        let mut bytes = Vec::with_capacity(10 + digest.len());
        write_uvarint(&mut bytes, generation);
        bytes.extend_from_slice(digest);
        Self { bytes }
    }

    /// Serialize a version vector as a revID.
    pub fn from_version_vector(vv: &VersionVector, my_id: PeerId) -> Self {
        Self {
            bytes: vv.to_binary(my_id),
        }
    }

    /// Parse either ASCII form. Tree form contains `-`, vector form `@`.
    pub fn parse_ascii(s: &[u8]) -> Result<Self> {
        if s.contains(&b'@') {
            return Ok(Self::from_version_vector(
                &VersionVector::parse_ascii(s)?,
                PeerId::ME,
            ));
        }
        let dash = s
            .iter()
            .position(|&b| b == b'-')
            .ok_or_else(|| bad("revision ID has neither '-' nor '@'"))?;
        let generation = parse_hex(&s[..dash]).ok_or_else(|| bad("bad generation"))?;
        if generation == 0 {
            return Err(bad("generation 0 is invalid"));
        }
        let digest = parse_hex_bytes(&s[dash + 1..]).ok_or_else(|| bad("bad digest"))?;
        if digest.is_empty() {
            return Err(bad("empty digest"));
        }
        Ok(Self::tree(generation, &digest))
    }

    /// The raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether this is the "never saved" ID.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the bytes are in version-vector form.
    #[inline]
    pub fn is_version_vector(&self) -> bool {
        self.bytes.first() == Some(&0)
    }

    /// The generation: the leading integer of a tree revID, or position 0's
    /// generation of a vector revID. Zero for an empty or unreadable ID.
    pub fn generation(&self) -> Generation {
        if self.is_empty() {
            return 0;
        }
        if self.is_version_vector() {
            VersionVector::read_current_version_from_binary(&self.bytes)
                .map_or(0, |v| v.generation())
        } else {
            read_uvarint(&self.bytes).map_or(0, |(generation, _)| generation)
        }
    }

    /// The digest bytes of a tree revID, or `None` for other shapes.
    pub fn digest(&self) -> Option<&[u8]> {
        if self.is_empty() || self.is_version_vector() {
            return None;
        }
        read_uvarint(&self.bytes).map(|(_, n)| &self.bytes[n..])
    }

    /// Decode position 0 of a vector revID.
    pub fn version(&self) -> Result<Version> {
        VersionVector::read_current_version_from_binary(&self.bytes)
    }

    /// Decode the full version vector of a vector revID.
    pub fn as_version_vector(&self) -> Result<VersionVector> {
        VersionVector::from_binary(&self.bytes)
    }

    /// The ASCII rendering. Empty IDs render as the empty string.
    pub fn ascii(&self, my_id: PeerId) -> String {
        if self.is_empty() {
            return String::new();
        }
        if self.is_version_vector() {
            return match self.as_version_vector() {
                Ok(vv) => vv.ascii(my_id),
                Err(_) => hex(&self.bytes),
            };
        }
        match read_uvarint(&self.bytes) {
            Some((generation, n)) => {
                format!("{:x}-{}", generation, hex(&self.bytes[n..]))
            }
            None => hex(&self.bytes),
        }
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ascii(PeerId::ME))
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("write to String");
    }
    s
}

fn parse_hex(s: &[u8]) -> Option<u64> {
    if s.is_empty() || s.len() > 16 {
        return None;
    }
    u64::from_str_radix(std::str::from_utf8(s).ok()?, 16).ok()
}

fn parse_hex_bytes(s: &[u8]) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let text = std::str::from_utf8(s).ok()?;
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}
