//! Slab Arena for Byte Buffers
//!
//! A single-process slab allocator that carves fixed-size chunks out of
//! larger slabs, grouped into geometrically sized classes, and hands
//! them out as reference-counted, chainable byte regions.
//!
//! # Architecture
//!
//! ```text
//! Arena (random magic)
//!   ├─→ SizeClass(1B)   → slabs: [s0]      free: c7 → c6 → c5 → nil
//!   ├─→ SizeClass(2B)   → slabs: []        free: nil
//!   ├─→ SizeClass(4B)   → slabs: [s0, s1]  free: c1 → nil
//!   └─→ SizeClass(8B)   → slabs: [s0]      free: nil
//!
//! Slab memory layout (per slab):
//!   [chunk 0][chunk 1]...[chunk N-1][class idx|slab idx|magic]
//!                                   └───── 12-byte footer ────┘
//! ```
//!
//! Every slab ends in a 12-byte footer naming its size class, slab
//! index and the arena's random magic. Buffer handles are cross-checked
//! against it, and a raw byte region that runs to its slab's end
//! resolves back to its chunk from the footer distance alone, with no
//! side table. Free chunks are threaded into a per-class intrusive
//! free-list through the same `next` field that chains buffers while
//! they are in use.
//!
//! The arena is not internally synchronized; wrap it in a lock for
//! multi-threaded use. Slab memory is retained until the arena drops.

#![warn(rust_2018_idioms)]

pub mod arena;
pub mod bench;
pub mod buf;
pub mod loc;
pub mod production_tests;
pub mod size_class;
pub mod slab;

pub use arena::{Arena, BackingAllocator};
pub use buf::Buf;
pub use loc::Loc;

/// Error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
