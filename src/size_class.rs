//! Size class management: slabs of one chunk size and their free-list

use crate::loc::{Chunk, Loc};
use crate::slab::Slab;

/// A size class owns every slab of one chunk size
///
/// Free chunks are threaded into an intrusive singly linked list through
/// the chunk's `next` field; `chunk_free` is the head. The same field is
/// reused as the chain link once the chunk is in use, so a chunk is on
/// the free-list if and only if its ref-count is zero.
pub(crate) struct SizeClass {
    /// A growing list of slabs, never shrunk
    pub(crate) slabs: Vec<Slab>,
    /// Size of chunks in this class (bytes)
    pub(crate) chunk_size: usize,
    /// Free-list head, `Loc::NIL` when empty
    pub(crate) chunk_free: Loc,

    pub(crate) num_chunks: i64,
    pub(crate) num_chunks_free: i64,
}

impl SizeClass {
    pub(crate) fn new(chunk_size: usize) -> Self {
        Self {
            slabs: Vec::new(),
            chunk_size,
            chunk_free: Loc::NIL,
            num_chunks: 0,
            num_chunks_free: 0,
        }
    }

    /// Push a chunk onto the free-list. The chunk must hold no
    /// references.
    pub(crate) fn push_free_chunk(&mut self, loc: Loc) {
        let head = self.chunk_free;
        let c = self
            .chunk_mut(loc)
            .expect("push_free_chunk() with out-of-range loc");
        if c.refs != 0 {
            panic!("push_free_chunk() with non-zero refs: {:?}", c);
        }
        c.next = head;
        self.chunk_free = c.self_loc;
        self.num_chunks_free += 1;
    }

    /// Pop the free-list head, handing it out with one reference.
    /// Popping an empty list is an invariant breach, not a capacity
    /// failure; callers grow the class first.
    pub(crate) fn pop_free_chunk(&mut self) -> Loc {
        if self.chunk_free.is_nil() {
            panic!("pop_free_chunk() with empty free-list");
        }
        let head = self.chunk_free;
        let c = self
            .chunk_mut(head)
            .expect("pop_free_chunk() with out-of-range head");
        if c.refs != 0 {
            panic!("pop_free_chunk() with non-zero refs: {:?}", c);
        }
        c.refs = 1;
        let self_loc = c.self_loc;
        let next = c.next;
        c.next = Loc::NIL;
        self.chunk_free = next;
        self.num_chunks_free -= 1;
        if self.num_chunks_free < 0 {
            panic!("pop_free_chunk() drove free count below zero");
        }
        self_loc
    }

    pub(crate) fn chunk(&self, loc: Loc) -> Option<&Chunk> {
        if loc.is_nil() {
            return None;
        }
        self.slabs
            .get(loc.slab_index as usize)?
            .chunks
            .get(loc.chunk_index as usize)
    }

    pub(crate) fn chunk_mut(&mut self, loc: Loc) -> Option<&mut Chunk> {
        if loc.is_nil() {
            return None;
        }
        self.slabs
            .get_mut(loc.slab_index as usize)?
            .chunks
            .get_mut(loc.chunk_index as usize)
    }

    /// Byte offset of a chunk's base within its slab region
    pub(crate) fn chunk_offset(&self, loc: Loc) -> usize {
        self.chunk_size * loc.chunk_index as usize
    }
}

/// Next chunk size in the geometric progression. Ceiling rounding is
/// forced to strict growth so the class table stays strictly increasing
/// even when the factor rounds to a no-op.
pub(crate) fn next_chunk_size(chunk_size: usize, growth_factor: f64) -> usize {
    let grown = (chunk_size as f64 * growth_factor).ceil() as usize;
    if grown <= chunk_size {
        chunk_size + 1
    } else {
        grown
    }
}
