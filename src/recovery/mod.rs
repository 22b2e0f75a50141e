//! Crash recovery: reconstructs the hash index and the hybrid log's in-memory
//! window from a pair of independent checkpoints.
//!
//! The flow (driven by [`RecoveryDriver`]):
//!
//! 1. Prune incomplete checkpoints; pick the latest index and log tokens.
//! 2. Check both completion markers and the compatibility invariant
//!    (index cut-point ≤ log tail).
//! 3. Restore the fuzzy hash index from its chunk files.
//! 4. Replay the log tail against the index ([`LogReplayer`]) through the
//!    bounded page ring ([`PageIo`]), in fold-over or snapshot mode.
//! 5. Re-read the warm page window `[head, tail]` and reset the log.
//! 6. Rehydrate per-session resume points.
//!
//! Everything runs single-threaded in the orchestrator; I/O completions run
//! on the `PageIo` worker and communicate through [`RecoveryStatus`]'s
//! per-frame status words.

mod driver;
mod page_io;
mod replay;
mod status;

pub use driver::{RecoveryDriver, RecoveryOutcome, SessionRegistry};
pub use page_io::{PageIo, PageSource, ReplayIoPlan};
pub use replay::LogReplayer;
pub use status::RecoveryStatus;
