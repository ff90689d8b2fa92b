//! Version-vector algebra and revision identifiers.
//!
//! A document revision is identified either by a legacy *tree* revision ID
//! (`generation "-" digest`) or by a *version vector*: an ordered list of
//! `(generation, peer)` pairs forming a partial-order timestamp across
//! replicas. This crate implements the vector algebra (compare, merge,
//! increment, peer-ID compaction) and both revision-ID codecs.

pub mod revid;
pub mod vector;
pub mod version;

pub use revid::RevId;
pub use vector::VersionVector;
pub use version::{Generation, PeerId, Version, VersionOrder};
