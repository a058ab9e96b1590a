//! Production integration tests for the slab arena
//!
//! These tests verify real-world usage scenarios end to end: chunk
//! reuse, chain ownership, class growth and failure accounting.

#[cfg(test)]
mod integration {
    use crate::arena::{Arena, BackingAllocator};
    use std::collections::HashMap;

    fn stats(a: &Arena) -> HashMap<String, i64> {
        let mut m = HashMap::new();
        a.stats(&mut m);
        m
    }

    #[test]
    fn test_basic_reuse() {
        let mut arena = Arena::new(1, 8, 2.0, None).unwrap();

        let a = arena.alloc(1).expect("alloc should succeed");
        assert!(arena.dec_ref(a));
        let b = arena.alloc(1).expect("alloc should succeed");

        // The freed chunk is reused immediately.
        assert_eq!(a, b);

        let m = stats(&arena);
        assert_eq!(m["numAllocs"], 2);
        assert_eq!(m["slabClass-000000-numChunksFree"], 7);
        assert_eq!(m["slabClass-000000-numChunks"], 8);
    }

    #[test]
    fn test_chain_release_returns_all_chunks() {
        let mut arena = Arena::new(1, 8, 2.0, None).unwrap();

        // Materialize the slab, then record the idle state.
        let warmup = arena.alloc(1).unwrap();
        arena.dec_ref(warmup);
        let free_before = stats(&arena)["slabClass-000000-numChunksFree"];

        let a = arena.alloc(1).unwrap();
        let b = arena.alloc(1).unwrap();
        arena.set_next(a, Some(b));
        assert!(!arena.dec_ref(b));
        assert!(arena.dec_ref(a));

        let m = stats(&arena);
        assert_eq!(m["slabClass-000000-numChunksFree"], free_before);
        assert_eq!(m["slabClass-000000-numChunksInUse"], 0);
    }

    #[test]
    fn test_deep_chain_release() {
        let mut arena = Arena::new(8, 64, 2.0, None).unwrap();

        let bufs: Vec<_> = (0..50).map(|_| arena.alloc(8).unwrap()).collect();
        for pair in bufs.windows(2) {
            arena.set_next(pair[0], Some(pair[1]));
        }
        // Drop the caller's refs on everything but the head.
        for buf in &bufs[1..] {
            assert!(!arena.dec_ref(*buf));
        }
        let m = stats(&arena);
        assert_eq!(m["slabClass-000000-numChunksInUse"], 50);

        // Releasing the head releases the entire chain.
        assert!(arena.dec_ref(bufs[0]));
        let m = stats(&arena);
        assert_eq!(m["slabClass-000000-numChunksInUse"], 0);
    }

    #[test]
    fn test_cross_class_growth() {
        let mut arena = Arena::new(1, 1024, 2.0, None).unwrap();

        let small = arena.alloc(1).unwrap();
        let m = stats(&arena);
        assert_eq!(m["numSlabClasses"], 1);

        // alloc(3) forces classes 2 and 4 into existence and lands in
        // the 4-byte class.
        let bigger = arena.alloc(3).unwrap();
        let m = stats(&arena);
        assert_eq!(m["numSlabClasses"], 3);
        assert_eq!(m["slabClass-000002-chunkSize"], 4);
        assert_eq!(m["slabClass-000002-numChunksInUse"], 1);

        arena.dec_ref(small);
        arena.dec_ref(bigger);
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let mut arena = Arena::new(1, 8, 2.0, None).unwrap();
        let ours = arena.alloc(4).unwrap();
        assert!(arena.owns(ours));

        let foreign_backing = vec![0u8; 256];
        assert!(!arena.owns_region(&foreign_backing));

        // A second arena rejects the first arena's buffers: the magic
        // on the handle does not match the one in its slab footers.
        let other = Arena::new(1, 8, 2.0, None).unwrap();
        assert!(!other.owns(ours));
    }

    #[test]
    fn test_too_big_alloc() {
        let mut arena = Arena::new(1, 16, 2.0, None).unwrap();
        assert!(arena.alloc(17).is_none());

        let m = stats(&arena);
        assert_eq!(m["numTooBigErrs"], 1);
        assert_eq!(m["numMallocs"], 0);
    }

    #[test]
    fn test_backing_allocator_failure() {
        let mut invocation = 0;
        let backing: BackingAllocator = Box::new(move |size| {
            invocation += 1;
            if invocation == 2 {
                None
            } else {
                Some(vec![0u8; size])
            }
        });
        let mut arena = Arena::new(16, 16, 2.0, Some(backing)).unwrap();

        // The initial slab satisfies the first alloc.
        let first = arena.alloc(16).expect("initial slab should satisfy this");
        // Growing the class hits the failing invocation.
        assert!(arena.alloc(16).is_none());

        let m = stats(&arena);
        assert_eq!(m["numAddSlabErrs"], 1);
        assert_eq!(m["numMallocErrs"], 1);

        // The freed chunk satisfies the next alloc with no new slab.
        arena.dec_ref(first);
        let again = arena.alloc(16).expect("freed chunk should satisfy this");
        arena.dec_ref(again);
    }

    #[test]
    fn test_mixed_workload_accounting() {
        let mut arena = Arena::new(4, 4096, 1.3, None).unwrap();

        let mut held = Vec::new();
        for i in 0..500 {
            let size = (i * 37) % 600;
            match arena.alloc(size) {
                Some(buf) => {
                    arena.bytes_mut(buf).fill((i % 251) as u8);
                    held.push((buf, (i % 251) as u8));
                }
                None => panic!("alloc of {} bytes should succeed", size),
            }
            // Free every third buffer as we go.
            if i % 3 == 0 {
                let (buf, _) = held.remove(held.len() / 2);
                assert!(arena.dec_ref(buf));
            }
        }

        // Held buffers kept their contents.
        for (buf, fill) in &held {
            assert!(arena.bytes(*buf).iter().all(|b| b == fill));
        }

        // Per class: free + in-use == total, and chunk sizes strictly
        // increase across the class table.
        let m = stats(&arena);
        let classes = m["numSlabClasses"];
        let mut last_chunk_size = 0;
        for i in 0..classes {
            let prefix = format!("slabClass-{:06}-", i);
            let chunk_size = m[&format!("{}chunkSize", prefix)];
            assert!(chunk_size > last_chunk_size);
            last_chunk_size = chunk_size;

            let total = m[&format!("{}numChunks", prefix)];
            let free = m[&format!("{}numChunksFree", prefix)];
            let in_use = m[&format!("{}numChunksInUse", prefix)];
            assert_eq!(free + in_use, total);
        }

        println!(
            "mixed workload: {} classes, {} allocs, {} held",
            classes,
            m["numAllocs"],
            held.len()
        );

        for (buf, _) in held {
            arena.dec_ref(buf);
        }
        let m = stats(&arena);
        assert_eq!(m["numMallocErrs"], 0);
    }
}
