//! Chunk locations and per-chunk metadata

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical address of a chunk managed by an [`Arena`](crate::Arena)
///
/// A `Loc` names a chunk by (size class, slab, chunk) indices plus the
/// recorded byte length. For a freshly allocated chunk the length equals
/// the physical chunk size; for a chain link it is the logical length of
/// the successor buffer at the time the link was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Loc {
    pub(crate) slab_class_index: i32,
    pub(crate) slab_index: i32,
    pub(crate) chunk_index: i32,
    pub(crate) chunk_size: i32,
}

impl Loc {
    /// The nil sentinel: terminates free-lists and marks "no successor".
    pub const NIL: Loc = Loc {
        slab_class_index: -1,
        slab_index: -1,
        chunk_index: -1,
        chunk_size: -1,
    };

    pub(crate) fn new(
        slab_class_index: usize,
        slab_index: usize,
        chunk_index: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            slab_class_index: slab_class_index as i32,
            slab_index: slab_index as i32,
            chunk_index: chunk_index as i32,
            chunk_size: chunk_size as i32,
        }
    }

    /// Whether this is the nil sentinel
    pub fn is_nil(&self) -> bool {
        self.slab_class_index == -1
            && self.slab_index == -1
            && self.chunk_index == -1
            && self.chunk_size == -1
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "Loc(nil)");
        }
        write!(
            f,
            "Loc(class={}, slab={}, chunk={}, size={})",
            self.slab_class_index, self.slab_index, self.chunk_index, self.chunk_size
        )
    }
}

/// Per-chunk metadata record
///
/// `next` does double duty: free-list link while the chunk is free
/// (refs == 0), chain link to a successor buffer while it is in use.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    /// Ref-count
    pub(crate) refs: i32,
    /// This chunk's own location
    pub(crate) self_loc: Loc,
    /// Free-list link or chain link
    pub(crate) next: Loc,
}

impl Chunk {
    pub(crate) fn new(self_loc: Loc) -> Self {
        Self {
            refs: 0,
            self_loc,
            next: Loc::NIL,
        }
    }

    /// Increment the ref-count. A result of 1 or less means the caller
    /// held no reference to begin with, which is a contract violation.
    pub(crate) fn add_ref(&mut self) {
        self.refs += 1;
        if self.refs <= 1 {
            panic!("unexpected ref-count during add_ref: {:?}", self);
        }
    }
}
