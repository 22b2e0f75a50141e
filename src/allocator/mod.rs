//! Hybrid log allocator: a bounded in-memory page ring over an append-only
//! on-disk log.

mod hybrid_log;

pub use hybrid_log::{HybridLog, PageRing};
