//! One revision of a document.

use vellum_error::Result;
use vellum_types::DocumentFlags;
use vellum_value::Dict;
use vellum_vers::{RevId, Version, VersionVector};

/// A revision: properties, revision ID, and flags. Identity is the revID.
#[derive(Debug, Clone)]
pub struct Revision {
    /// The revision's properties.
    pub properties: Dict,
    /// The revision's ID.
    pub rev_id: RevId,
    /// Revision-level flags.
    pub flags: DocumentFlags,
}

impl Revision {
    /// Position 0 of the revID's version vector.
    pub fn version(&self) -> Result<Version> {
        self.rev_id.version()
    }

    /// The revID decoded as a full version vector.
    pub fn version_vector(&self) -> Result<VersionVector> {
        self.rev_id.as_version_vector()
    }

    /// Whether this revision is a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(DocumentFlags::DELETED)
    }

    /// Whether this revision is in conflict.
    pub fn is_conflicted(&self) -> bool {
        self.flags.contains(DocumentFlags::CONFLICTED)
    }

    /// Whether this revision's body references attachments.
    pub fn has_attachments(&self) -> bool {
        self.flags.contains(DocumentFlags::HAS_ATTACHMENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_vers::PeerId;

    #[test]
    fn version_helpers_decode_the_revid() {
        let vv = VersionVector::parse_ascii(b"3@a,1@b").unwrap();
        let rev = Revision {
            properties: Dict::empty(),
            rev_id: RevId::from_version_vector(&vv, PeerId::ME),
            flags: DocumentFlags::DELETED,
        };
        assert_eq!(rev.version().unwrap(), Version::new(3, PeerId(0xa)));
        assert_eq!(rev.version_vector().unwrap(), vv);
        assert!(rev.is_deleted());
        assert!(!rev.is_conflicted());
    }
}
