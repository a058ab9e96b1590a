//! The arena: size-class table, allocation paths, reverse lookup,
//! ref-counting and chaining

use crate::buf::Buf;
use crate::error::{Error, Result};
use crate::loc::{Chunk, Loc};
use crate::size_class::{next_chunk_size, SizeClass};
use crate::slab::{read_footer, Slab, FOOTER_LEN};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Backing memory provider: takes a byte count, returns a writable
/// region of exactly that length, or `None` on failure.
pub type BackingAllocator = Box<dyn FnMut(usize) -> Option<Vec<u8>>>;

fn default_backing_allocator(size: usize) -> Option<Vec<u8>> {
    Some(vec![0u8; size])
}

/// A slab arena managing byte-buffer memory
///
/// The arena carves fixed-size chunks out of slabs obtained from the
/// backing allocator, grouped into size classes whose chunk sizes grow
/// geometrically. Buffers are handed out as [`Buf`] handles carrying one
/// reference each; [`Arena::set_next`] chains buffers with an
/// arena-internal reference on the successor.
///
/// The arena is not internally synchronized; callers requiring
/// multi-threaded access must wrap it in external mutual exclusion.
/// Slabs are never returned to the backing allocator before the arena
/// is dropped.
pub struct Arena {
    growth_factor: f64,
    /// Size classes in strictly increasing chunk-size order
    size_classes: Vec<SizeClass>,
    /// Per-arena magic stamped into each slab footer
    slab_magic: u32,
    slab_size: usize,
    malloc: BackingAllocator,

    num_allocs: i64,
    num_add_refs: i64,
    num_dec_refs: i64,
    num_get_nexts: i64,
    num_set_nexts: i64,
    num_mallocs: i64,
    num_malloc_errs: i64,
    num_too_big_errs: i64,
    num_add_slab_errs: i64,
    num_pop_free_chunk_errs: i64,
}

impl Arena {
    /// Create an arena.
    ///
    /// `start_chunk_size` and `slab_size` must be greater than zero and
    /// `growth_factor` greater than 1.0. When `malloc` is `None`, a
    /// default allocator returning zero-initialized regions is used.
    pub fn new(
        start_chunk_size: usize,
        slab_size: usize,
        growth_factor: f64,
        malloc: Option<BackingAllocator>,
    ) -> Result<Self> {
        if start_chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "start_chunk_size must be greater than zero".to_string(),
            ));
        }
        if slab_size == 0 {
            return Err(Error::InvalidArgument(
                "slab_size must be greater than zero".to_string(),
            ));
        }
        if !(growth_factor > 1.0) {
            return Err(Error::InvalidArgument(format!(
                "growth_factor must be greater than 1.0, got {}",
                growth_factor
            )));
        }

        let mut arena = Self {
            growth_factor,
            size_classes: Vec::new(),
            slab_magic: rand::random(),
            slab_size,
            malloc: malloc.unwrap_or_else(|| Box::new(default_backing_allocator)),
            num_allocs: 0,
            num_add_refs: 0,
            num_dec_refs: 0,
            num_get_nexts: 0,
            num_set_nexts: 0,
            num_mallocs: 0,
            num_malloc_errs: 0,
            num_too_big_errs: 0,
            num_add_slab_errs: 0,
            num_pop_free_chunk_errs: 0,
        };
        arena.add_size_class(start_chunk_size);

        info!(
            start_chunk_size,
            slab_size, growth_factor, "initializing slab arena"
        );
        Ok(arena)
    }

    /// Allocate a buffer of exactly `buf_size` bytes, owned by the
    /// caller with one reference. Returns `None` when the size exceeds
    /// the slab size or the backing allocator fails.
    pub fn alloc(&mut self, buf_size: usize) -> Option<Buf> {
        let loc = self.alloc_chunk(buf_size)?;
        Some(self.chunk_buf(loc, buf_size))
    }

    /// As [`Arena::alloc`], returning the chunk's location handle
    /// instead. Returns [`Loc::NIL`] on failure.
    pub fn alloc_loc(&mut self, buf_size: usize) -> Loc {
        match self.alloc_chunk(buf_size) {
            Some(loc) => loc,
            None => Loc::NIL,
        }
    }

    fn alloc_chunk(&mut self, buf_size: usize) -> Option<Loc> {
        self.num_allocs += 1;

        if buf_size > self.slab_size {
            self.num_too_big_errs += 1;
            return None;
        }

        let slab_class_index = self.find_slab_class_index(buf_size);

        if self.size_classes[slab_class_index].chunk_free.is_nil() {
            if !self.add_slab(slab_class_index) {
                self.num_add_slab_errs += 1;
                return None;
            }
        }

        let sc = &mut self.size_classes[slab_class_index];
        if sc.chunk_free.is_nil() {
            self.num_pop_free_chunk_errs += 1;
            return None;
        }
        Some(sc.pop_free_chunk())
    }

    /// Increase the ref-count on a buffer. The buffer must have come
    /// from this arena.
    pub fn add_ref(&mut self, buf: Buf) {
        self.num_add_refs += 1;
        let loc = self.resolve(buf);
        self.chunk_mut(loc).add_ref();
    }

    /// Decrease the ref-count on a buffer. Once the count reaches zero
    /// the chunk returns to its free-list, releasing any chained
    /// successors first. Returns `true` iff this call freed the chunk.
    pub fn dec_ref(&mut self, buf: Buf) -> bool {
        self.num_dec_refs += 1;
        let loc = self.resolve(buf);
        self.dec_ref_loc(loc)
    }

    /// Whether this arena produced `buf`
    pub fn owns(&self, buf: Buf) -> bool {
        self.buf_container(buf).is_some()
    }

    /// Whether this arena produced the raw byte region. The region
    /// must extend from its chunk's base to the end of the slab region
    /// the way the arena lays them out; a region truncated short of the
    /// trailer is not recognized.
    pub fn owns_region(&self, region: &[u8]) -> bool {
        self.region_container(region).is_some()
    }

    /// Return the chained successor of `buf`, or `None` when there is
    /// none. The returned buffer carries a fresh reference; the caller
    /// must `dec_ref` it when done. Its length is the successor's
    /// logical length recorded at [`Arena::set_next`] time.
    pub fn get_next(&mut self, buf: Buf) -> Option<Buf> {
        self.num_get_nexts += 1;
        let loc = self.resolve(buf);
        let c = self.chunk_ref(loc);
        if c.refs <= 0 {
            panic!("unexpected ref-count during get_next: {:?}", c);
        }
        let next = c.next;
        if next.is_nil() {
            return None;
        }
        let next_chunk = self.chunk_mut(next);
        next_chunk.add_ref();
        let next_self = next_chunk.self_loc;
        Some(self.chunk_buf(next_self, next.chunk_size as usize))
    }

    /// Install or replace the chain link from `buf` to `buf_next`.
    ///
    /// The arena holds one reference on the successor for as long as the
    /// link exists: a previous successor is released, a new one gains a
    /// reference. The successor's logical length is recorded on the link
    /// and is what a later [`Arena::get_next`] returns. A zero-length
    /// successor is permitted; `get_next` then returns a zero-length
    /// buffer rather than `None`.
    pub fn set_next(&mut self, buf: Buf, buf_next: Option<Buf>) {
        self.num_set_nexts += 1;
        let loc = self.resolve(buf);
        let c = self.chunk_ref(loc);
        if c.refs <= 0 {
            panic!("unexpected ref-count during set_next: {:?}", c);
        }
        let old_next = c.next;
        if !old_next.is_nil() {
            self.dec_ref_loc(old_next);
        }
        self.chunk_mut(loc).next = Loc::NIL;
        if let Some(next_buf) = buf_next {
            let next_loc = match self.buf_container(next_buf) {
                Some(l) => l,
                None => panic!("buf_next not from this arena"),
            };
            let next_chunk = self.chunk_mut(next_loc);
            next_chunk.add_ref();
            let mut link = next_chunk.self_loc;
            link.chunk_size = next_buf.len() as i32;
            self.chunk_mut(loc).next = link;
        }
    }

    /// Read access to a buffer's bytes. The buffer must have come from
    /// this arena.
    pub fn bytes(&self, buf: Buf) -> &[u8] {
        let loc = self.resolve(buf);
        let sc = &self.size_classes[loc.slab_class_index as usize];
        let beg = sc.chunk_offset(loc);
        &sc.slabs[loc.slab_index as usize].memory[beg..beg + buf.len()]
    }

    /// Write access to a buffer's bytes. The buffer must have come from
    /// this arena.
    pub fn bytes_mut(&mut self, buf: Buf) -> &mut [u8] {
        let loc = self.resolve(buf);
        let sc = &mut self.size_classes[loc.slab_class_index as usize];
        let beg = sc.chunk_offset(loc);
        &mut sc.slabs[loc.slab_index as usize].memory[beg..beg + buf.len()]
    }

    /// Fill `m` with runtime metrics about the arena.
    pub fn stats(&self, m: &mut HashMap<String, i64>) {
        m.insert("numSlabClasses".to_string(), self.size_classes.len() as i64);
        m.insert("numAllocs".to_string(), self.num_allocs);
        m.insert("numAddRefs".to_string(), self.num_add_refs);
        m.insert("numDecRefs".to_string(), self.num_dec_refs);
        m.insert("numGetNexts".to_string(), self.num_get_nexts);
        m.insert("numSetNexts".to_string(), self.num_set_nexts);
        m.insert("numMallocs".to_string(), self.num_mallocs);
        m.insert("numMallocErrs".to_string(), self.num_malloc_errs);
        m.insert("numTooBigErrs".to_string(), self.num_too_big_errs);
        m.insert("numAddSlabErrs".to_string(), self.num_add_slab_errs);
        m.insert(
            "numPopFreeChunkErrs".to_string(),
            self.num_pop_free_chunk_errs,
        );
        for (i, sc) in self.size_classes.iter().enumerate() {
            let prefix = format!("slabClass-{:06}-", i);
            m.insert(format!("{}numSlabs", prefix), sc.slabs.len() as i64);
            m.insert(format!("{}chunkSize", prefix), sc.chunk_size as i64);
            m.insert(format!("{}numChunks", prefix), sc.num_chunks);
            m.insert(format!("{}numChunksFree", prefix), sc.num_chunks_free);
            m.insert(
                format!("{}numChunksInUse", prefix),
                sc.num_chunks - sc.num_chunks_free,
            );
        }
    }

    /// Index of the smallest size class whose chunk size fits
    /// `buf_size`, appending new classes until one does.
    fn find_slab_class_index(&mut self, buf_size: usize) -> usize {
        loop {
            let i = self
                .size_classes
                .partition_point(|sc| sc.chunk_size < buf_size);
            if i < self.size_classes.len() {
                return i;
            }
            let last = self.size_classes[i - 1].chunk_size;
            self.add_size_class(next_chunk_size(last, self.growth_factor));
        }
    }

    fn add_size_class(&mut self, chunk_size: usize) {
        debug!(
            chunk_size,
            index = self.size_classes.len(),
            "adding size class"
        );
        self.size_classes.push(SizeClass::new(chunk_size));
    }

    /// Obtain one slab from the backing allocator and push all of its
    /// chunks onto the class free-list. No state is installed on
    /// failure.
    fn add_slab(&mut self, slab_class_index: usize) -> bool {
        let sc = &self.size_classes[slab_class_index];
        let chunk_size = sc.chunk_size;
        let slab_index = sc.slabs.len();
        let mut chunks_per_slab = self.slab_size / chunk_size;
        if chunks_per_slab == 0 {
            chunks_per_slab = 1;
        }
        // Re-multiplying avoids a fractional chunk at the slab tail.
        let memory_size = chunks_per_slab * chunk_size + FOOTER_LEN;

        self.num_mallocs += 1;
        let memory = match (self.malloc)(memory_size) {
            Some(m) if m.len() == memory_size => m,
            Some(m) => {
                warn!(
                    requested = memory_size,
                    returned = m.len(),
                    "backing allocator returned region of wrong length"
                );
                self.num_malloc_errs += 1;
                return false;
            }
            None => {
                self.num_malloc_errs += 1;
                return false;
            }
        };

        let slab = Slab::new(
            memory.into_boxed_slice(),
            slab_class_index,
            slab_index,
            chunks_per_slab,
            chunk_size,
            self.slab_magic,
        );
        let sc = &mut self.size_classes[slab_class_index];
        sc.slabs.push(slab);
        for i in 0..chunks_per_slab {
            sc.push_free_chunk(Loc::new(slab_class_index, slab_index, i, chunk_size));
        }
        sc.num_chunks += chunks_per_slab as i64;

        debug!(
            slab_class_index,
            slab_index, chunk_size, chunks_per_slab, "added slab"
        );
        true
    }

    /// Resolve a buffer handle to its chunk. The handle's indices are
    /// cross-checked against the trailer of the slab they name; a
    /// mismatched magic or an out-of-range index means the handle is
    /// not ours.
    fn buf_container(&self, buf: Buf) -> Option<Loc> {
        if buf.magic != self.slab_magic {
            return None;
        }
        let loc = buf.loc;
        let sc = self.size_classes.get(loc.slab_class_index as usize)?;
        let slab = sc.slabs.get(loc.slab_index as usize)?;
        let footer = &slab.memory[slab.memory.len() - FOOTER_LEN..];
        let (slab_class_index, slab_index, magic) = read_footer(footer);
        if slab_class_index != loc.slab_class_index as u32
            || slab_index != loc.slab_index as u32
            || magic != self.slab_magic
        {
            return None;
        }
        Some(slab.chunks.get(loc.chunk_index as usize)?.self_loc)
    }

    /// Recover the chunk owning a raw byte region from the trailer at
    /// its end: the trailer names the size class and slab, and the
    /// byte distance to the trailer gives the chunk index.
    fn region_container(&self, region: &[u8]) -> Option<Loc> {
        if region.len() <= FOOTER_LEN {
            return None;
        }
        let footer_distance = region.len() - FOOTER_LEN;
        let (slab_class_index, slab_index, magic) = read_footer(&region[footer_distance..]);
        if magic != self.slab_magic {
            return None;
        }
        let sc = self.size_classes.get(slab_class_index as usize)?;
        let slab = sc.slabs.get(slab_index as usize)?;
        let chunk_index = slab
            .chunks
            .len()
            .checked_sub(footer_distance / sc.chunk_size)?;
        Some(slab.chunks.get(chunk_index)?.self_loc)
    }

    fn resolve(&self, buf: Buf) -> Loc {
        match self.buf_container(buf) {
            Some(loc) => loc,
            None => panic!("buf not from this arena"),
        }
    }

    /// Build the handle for a chunk with the given logical length.
    fn chunk_buf(&self, loc: Loc, len: usize) -> Buf {
        let mut loc = loc;
        loc.chunk_size = len as i32;
        Buf {
            loc,
            magic: self.slab_magic,
        }
    }

    fn chunk_ref(&self, loc: Loc) -> &Chunk {
        self.size_classes[loc.slab_class_index as usize]
            .chunk(loc)
            .expect("chunk loc out of range")
    }

    fn chunk_mut(&mut self, loc: Loc) -> &mut Chunk {
        self.size_classes[loc.slab_class_index as usize]
            .chunk_mut(loc)
            .expect("chunk loc out of range")
    }

    fn dec_ref_loc(&mut self, loc: Loc) -> bool {
        let slab_class_index = loc.slab_class_index as usize;
        let c = self.size_classes[slab_class_index]
            .chunk_mut(loc)
            .expect("chunk loc out of range");
        c.refs -= 1;
        if c.refs < 0 {
            panic!("unexpected ref-count during dec_ref: {:?}", c);
        }
        if c.refs > 0 {
            return false;
        }
        let next = c.next;
        c.next = Loc::NIL;
        if !next.is_nil() {
            self.dec_ref_loc(next);
        }
        self.size_classes[slab_class_index].push_free_chunk(loc);
        true
    }
}
