//! Encoded value trees with mutable overlays.
//!
//! Documents store their properties as encoded value trees. Decoding yields
//! cheap shared (`Rc`-backed) immutable nodes; callers that mutate get a
//! *mutable overlay* copied from the shared node, carrying a dirty bit and a
//! link back to its source so re-encoding can tell what changed and where a
//! value came from.
//!
//! The binary codec supports back-references: an encoder can write a value
//! it has already written as a small pointer, and decoding a back-reference
//! yields the *same* shared node. [`DedupEncoder`] builds on that to write
//! repeated subtrees only once.

pub mod codec;
pub mod dedup;
pub mod dirty;
pub mod iter;
pub mod json;
pub mod value;

pub use codec::{decode, decode_scoped, Encoder};
pub use dedup::DedupEncoder;
pub use iter::DeepIterator;
pub use json::to_canonical_json;
pub use value::{Array, Dict, MutableArray, MutableDict, Scope, Value};
