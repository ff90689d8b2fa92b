//! A single `(generation, peer)` version stamp.

use std::fmt;
use std::ops::BitOr;

use vellum_error::{Result, VellumError};
use vellum_types::varint::{read_uvarint, write_uvarint};

/// Identifier of a peer database. 64-bit, opaque.
///
/// [`PeerId::ME`] (zero) is reserved for "this local database" and is never
/// written to disk as an author; serialization substitutes the caller's
/// explicit ID so storage stays portable if the local peer is renamed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The reserved local-database peer ID.
    pub const ME: Self = Self(0);

    /// Whether this is the reserved local ID.
    #[inline]
    pub const fn is_me(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_me() {
            f.write_str("*")
        } else {
            write!(f, "{:x}", self.0)
        }
    }
}

/// Per-author mutation counter. Zero is invalid in a well-formed version.
pub type Generation = u64;

/// Relation of one version (or vector) to another.
///
/// A two-bit set: `Older` and `Newer` combine into `Conflicting` when each
/// side has changes the other lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VersionOrder {
    /// The two are identical.
    Same = 0,
    /// The subject is older.
    Older = 1,
    /// The subject is newer.
    Newer = 2,
    /// Each side has changes the other lacks.
    Conflicting = 3,
}

impl VersionOrder {
    #[inline]
    const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Same,
            1 => Self::Older,
            2 => Self::Newer,
            _ => Self::Conflicting,
        }
    }

    #[inline]
    const fn bits(self) -> u8 {
        self as u8
    }

    /// Swap `Older` and `Newer`, as when flipping the subject of a compare.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Older => Self::Newer,
            Self::Newer => Self::Older,
            other => other,
        }
    }
}

impl BitOr for VersionOrder {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.bits() | rhs.bits())
    }
}

/// A single version stamp: one author's generation count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    generation: Generation,
    author: PeerId,
}

fn bad_ascii(s: &[u8]) -> VellumError {
    VellumError::bad_revision(format!(
        "invalid version string '{}'",
        String::from_utf8_lossy(s)
    ))
}

fn bad_binary() -> VellumError {
    VellumError::bad_revision("invalid binary version")
}

/// Parse a `u64` from ASCII hex digits.
fn parse_hex(s: &[u8]) -> Option<u64> {
    if s.is_empty() || s.len() > 16 {
        return None;
    }
    let text = std::str::from_utf8(s).ok()?;
    u64::from_str_radix(text, 16).ok()
}

impl Version {
    /// Create a version. `generation` must be at least 1.
    pub fn new(generation: Generation, author: PeerId) -> Self {
        debug_assert!(generation >= 1, "generation 0 is invalid");
        Self { generation, author }
    }

    /// The author's generation count.
    #[inline]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// The author peer.
    #[inline]
    pub const fn author(&self) -> PeerId {
        self.author
    }

    /// Parse the ASCII form `hex(gen) "@" (hex(peer) | "*")`.
    pub fn parse_ascii(s: &[u8]) -> Result<Self> {
        let at = s.iter().position(|&b| b == b'@').ok_or_else(|| bad_ascii(s))?;
        let generation = parse_hex(&s[..at]).ok_or_else(|| bad_ascii(s))?;
        if generation == 0 {
            return Err(bad_ascii(s));
        }
        let author_part = &s[at + 1..];
        let author = if author_part == b"*" {
            PeerId::ME
        } else {
            let id = parse_hex(author_part).ok_or_else(|| bad_ascii(s))?;
            if id == 0 {
                // The local peer must be spelled "*", never "0".
                return Err(bad_ascii(s));
            }
            PeerId(id)
        };
        Ok(Self { generation, author })
    }

    /// Read the binary form (two varints) from the front of `data`,
    /// advancing the cursor.
    pub fn read_binary(data: &mut &[u8]) -> Result<Self> {
        let (generation, n) = read_uvarint(data).ok_or_else(bad_binary)?;
        *data = &data[n..];
        let (id, n) = read_uvarint(data).ok_or_else(bad_binary)?;
        *data = &data[n..];
        if generation == 0 {
            return Err(bad_binary());
        }
        Ok(Self {
            generation,
            author: PeerId(id),
        })
    }

    /// Append the binary form, substituting `my_id` for the reserved local
    /// peer ID.
    pub fn write_binary(&self, out: &mut Vec<u8>, my_id: PeerId) {
        let id = if self.author.is_me() { my_id } else { self.author };
        write_uvarint(out, self.generation);
        write_uvarint(out, id.0);
    }

    /// Append the ASCII form, substituting `my_id` for the reserved local
    /// peer ID (unless `my_id` is itself the reserved ID, which renders `*`).
    pub fn write_ascii(&self, out: &mut String, my_id: PeerId) {
        use std::fmt::Write;
        let author = if self.author.is_me() { my_id } else { self.author };
        write!(out, "{:x}@{author}", self.generation).expect("write to String");
    }

    /// The ASCII form as an owned string.
    pub fn ascii(&self, my_id: PeerId) -> String {
        let mut s = String::new();
        self.write_ascii(&mut s, my_id);
        s
    }

    /// Order two generation counts.
    pub fn compare_generations(a: Generation, b: Generation) -> VersionOrder {
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => VersionOrder::Newer,
            std::cmp::Ordering::Less => VersionOrder::Older,
            std::cmp::Ordering::Equal => VersionOrder::Same,
        }
    }

    /// Compare this version against a whole vector; the inverse of
    /// [`crate::VersionVector::compare_to_version`].
    pub fn compare_to_vector(&self, vv: &crate::VersionVector) -> VersionOrder {
        vv.compare_to_version(self).inverse()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}@{}", self.generation, self.author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ascii_forms() {
        let v = Version::parse_ascii(b"3@1a").unwrap();
        assert_eq!(v.generation(), 3);
        assert_eq!(v.author(), PeerId(0x1a));

        let me = Version::parse_ascii(b"ff@*").unwrap();
        assert_eq!(me.generation(), 0xff);
        assert!(me.author().is_me());
    }

    #[test]
    fn parse_ascii_rejects_malformed() {
        for bad in [
            &b""[..],
            b"3",
            b"@a",
            b"0@a",
            b"3@",
            b"3@0",
            b"3@zz",
            b"g@a",
            b"3@a@b",
            b"3@a ",
        ] {
            assert!(
                Version::parse_ascii(bad).is_err(),
                "accepted {:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn binary_roundtrip_substitutes_local_id() {
        let v = Version::new(7, PeerId::ME);
        let mut buf = Vec::new();
        v.write_binary(&mut buf, PeerId(0xbeef));
        let mut cur = &buf[..];
        let back = Version::read_binary(&mut cur).unwrap();
        assert!(cur.is_empty());
        assert_eq!(back.generation(), 7);
        assert_eq!(back.author(), PeerId(0xbeef));
    }

    #[test]
    fn binary_rejects_zero_generation() {
        let mut cur = &[0x00u8, 0x05][..];
        assert!(Version::read_binary(&mut cur).is_err());
        let mut truncated = &[0x81u8][..];
        assert!(Version::read_binary(&mut truncated).is_err());
    }

    #[test]
    fn ascii_renders_star_for_local() {
        let v = Version::new(2, PeerId::ME);
        assert_eq!(v.ascii(PeerId::ME), "2@*");
        assert_eq!(v.ascii(PeerId(0x1b)), "2@1b");
        let remote = Version::new(2, PeerId(9));
        assert_eq!(remote.ascii(PeerId(0x1b)), "2@9");
    }

    #[test]
    fn order_combines_as_bits() {
        assert_eq!(
            VersionOrder::Older | VersionOrder::Newer,
            VersionOrder::Conflicting
        );
        assert_eq!(VersionOrder::Same | VersionOrder::Older, VersionOrder::Older);
        assert_eq!(VersionOrder::Conflicting.inverse(), VersionOrder::Conflicting);
        assert_eq!(VersionOrder::Older.inverse(), VersionOrder::Newer);
    }

    #[test]
    fn compare_generations() {
        assert_eq!(Version::compare_generations(2, 1), VersionOrder::Newer);
        assert_eq!(Version::compare_generations(1, 2), VersionOrder::Older);
        assert_eq!(Version::compare_generations(2, 2), VersionOrder::Same);
    }
}
