//! Ordered vectors of version stamps.

use std::collections::HashMap;
use std::fmt;

use vellum_error::{Result, VellumError};

use crate::version::{Generation, PeerId, Version, VersionOrder};

/// An ordered list of [`Version`]s with unique authors.
///
/// Position 0 is the current (most recently written) version. The order of
/// the rest approximates recency; it is preserved by serialization but
/// carries no semantic weight beyond position 0.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionVector {
    versions: Vec<Version>,
}

fn bad_binary() -> VellumError {
    VellumError::bad_revision("invalid binary version vector")
}

impl VersionVector {
    /// An empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the binary form: a leading `0x00` byte, then each version as
    /// two varints.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let mut cur = data;
        match cur.split_first() {
            Some((0, rest)) => cur = rest,
            _ => return Err(bad_binary()),
        }
        let mut versions = Vec::new();
        while !cur.is_empty() {
            versions.push(Version::read_binary(&mut cur)?);
        }
        Ok(Self { versions })
    }

    /// Decode only position 0 of a binary vector, without materializing the
    /// rest.
    pub fn read_current_version_from_binary(data: &[u8]) -> Result<Version> {
        let mut cur = data;
        match cur.split_first() {
            Some((0, rest)) => cur = rest,
            _ => return Err(bad_binary()),
        }
        Version::read_binary(&mut cur)
    }

    /// Serialize to the binary form, substituting `my_id` for the reserved
    /// local peer ID.
    pub fn to_binary(&self, my_id: PeerId) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.versions.len() * 4);
        out.push(0); // leading 0 byte distinguishes it from a tree revID
        for v in &self.versions {
            v.write_binary(&mut out, my_id);
        }
        out
    }

    /// Parse the ASCII form: comma-separated versions. The empty string is
    /// rejected; callers that permit an empty vector handle that case first.
    pub fn parse_ascii(s: &[u8]) -> Result<Self> {
        if s.is_empty() {
            return Err(VellumError::bad_revision("empty version vector string"));
        }
        let mut versions = Vec::new();
        for part in s.split(|&b| b == b',') {
            versions.push(Version::parse_ascii(part)?);
        }
        Ok(Self { versions })
    }

    /// The ASCII form; an empty vector renders as the empty string.
    pub fn ascii(&self, my_id: PeerId) -> String {
        let mut out = String::new();
        for (n, v) in self.versions.iter().enumerate() {
            if n > 0 {
                out.push(',');
            }
            v.write_ascii(&mut out, my_id);
        }
        out
    }

    /// Number of versions.
    #[inline]
    pub fn count(&self) -> usize {
        self.versions.len()
    }

    /// Whether the vector has no versions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// The current version (position 0), if any.
    #[inline]
    pub fn current(&self) -> Option<&Version> {
        self.versions.first()
    }

    /// All versions in order.
    #[inline]
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// The generation this vector records for `author`, or 0 if absent.
    pub fn gen_of_author(&self, author: PeerId) -> Generation {
        self.find_author(author)
            .map_or(0, |i| self.versions[i].generation())
    }

    fn find_author(&self, author: PeerId) -> Option<usize> {
        self.versions.iter().position(|v| v.author() == author)
    }

    /// Compare against a single version.
    ///
    /// `Same` only when the version equals position 0 exactly; `Older` when
    /// the author is unknown or ahead of us; otherwise `Newer`.
    pub fn compare_to_version(&self, v: &Version) -> VersionOrder {
        match self.find_author(v.author()) {
            None => VersionOrder::Older,
            Some(i) => {
                let mine = &self.versions[i];
                if mine.generation() < v.generation() {
                    VersionOrder::Older
                } else if mine.generation() == v.generation() && i == 0 {
                    VersionOrder::Same
                } else {
                    VersionOrder::Newer
                }
            }
        }
    }

    /// Compare two vectors under the version-vector partial order.
    pub fn compare_to(&self, other: &Self) -> VersionOrder {
        let mut order = VersionOrder::Same;
        let mut count_diff = self.count() as isize - other.count() as isize;
        if count_diff < 0 {
            // Other must have versions from authors I don't have.
            order = VersionOrder::Older;
        } else if count_diff > 0 {
            order = VersionOrder::Newer;
        } else if self.versions == other.versions {
            // Identical vectors; skip the per-author walk.
            return VersionOrder::Same;
        }

        for v in &self.versions {
            let other_generation = other.gen_of_author(v.author());
            if v.generation() < other_generation {
                order = order | VersionOrder::Older;
            } else if v.generation() > other_generation {
                order = order | VersionOrder::Newer;
                if other_generation == 0 {
                    // Other lacks this author, so some of its entries must
                    // name authors I lack; once that becomes a certainty,
                    // I'm also older.
                    count_diff -= 1;
                    if count_diff < 0 {
                        order = order | VersionOrder::Older;
                    }
                }
            }
            if order == VersionOrder::Conflicting {
                break;
            }
        }
        order
    }

    /// Bump `author`'s generation and move it to position 0.
    ///
    /// Absent authors enter at generation 1.
    pub fn increment_generation(&mut self, author: PeerId) {
        let mut generation = 1;
        if let Some(i) = self.find_author(author) {
            generation += self.versions[i].generation();
            self.versions.remove(i);
        }
        self.versions.insert(0, Version::new(generation, author));
    }

    /// Append a version. The caller guarantees the author is not already
    /// present.
    pub fn append(&mut self, version: Version) {
        debug_assert!(
            self.find_author(version.author()).is_none(),
            "duplicate author in version vector"
        );
        self.versions.push(version);
    }

    /// Merge with `other`: every author from either side at the maximum of
    /// the two generations, in approximate recency order (this side first).
    #[must_use]
    pub fn merged_with(&self, other: &Self) -> Self {
        let index = |versions: &[Version]| -> HashMap<u64, Generation> {
            versions
                .iter()
                .map(|v| (v.author().0, v.generation()))
                .collect()
        };
        let my_map = index(&self.versions);
        let other_map = index(&other.versions);
        let lookup = |map: &HashMap<u64, Generation>, author: PeerId| -> Generation {
            map.get(&author.0).copied().unwrap_or(0)
        };

        // Walk both vectors in parallel, emitting each side's version when
        // it is at least as new as the other side's entry for that author
        // (strictly newer for the second side, to skip equal duplicates).
        let mut result = Self::new();
        let max_len = self.versions.len().max(other.versions.len());
        for i in 0..max_len {
            if let Some(v) = self.versions.get(i) {
                if v.generation() >= lookup(&other_map, v.author()) {
                    result.versions.push(*v);
                }
            }
            if let Some(v) = other.versions.get(i) {
                if v.generation() > lookup(&my_map, v.author()) {
                    result.versions.push(*v);
                }
            }
        }
        result
    }

    /// Replace an explicit `my_id` author with the reserved local ID, for
    /// portable storage.
    pub fn compact_my_peer_id(&mut self, my_id: PeerId) {
        if let Some(i) = self.find_author(my_id) {
            self.versions[i] = Version::new(self.versions[i].generation(), PeerId::ME);
        }
    }

    /// Replace the reserved local ID with an explicit `my_id`.
    pub fn expand_my_peer_id(&mut self, my_id: PeerId) {
        if let Some(i) = self.find_author(PeerId::ME) {
            self.versions[i] = Version::new(self.versions[i].generation(), my_id);
        }
    }

    /// Whether no version names the reserved local ID.
    pub fn is_expanded(&self) -> bool {
        self.versions.iter().all(|v| !v.author().is_me())
    }

    /// Truncate to at most `max_count` versions, dropping the tail.
    pub fn limit_count(&mut self, max_count: usize) {
        self.versions.truncate(max_count);
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ascii(PeerId::ME))
    }
}
