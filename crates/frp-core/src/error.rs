//! The graph-construction error taxonomy (category 1 in the design's
//! error-handling split). Categories 2-4 (late/duplicate planner
//! messages, user update panics, stop-during-work) are deliberately not
//! represented as `Result`s — see the crate-level docs.

use crate::node::ClusterId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("a loop edge may not connect nodes in different clusters")]
    LoopCrossesClusters,
    #[error("build() was already called on this runtime")]
    BuildCalledTwice,
    #[error("build() called with no nodes registered")]
    EmptyGraph,
    #[error("a CellLoop/StreamLoop/GlobalCellLoop was looped more than once")]
    AlreadyLooped,
    #[error("cannot open a nested transaction while cluster {0:?} is updating")]
    NestedTransactionWhileUpdating(ClusterId),
    #[error("no value exists for the requested transaction id, but the caller required one")]
    RequiredValueMissing,
}

/// Logs at error level and aborts the process, mirroring `failure_log` in
/// `original_source/src/prf/logger.hpp`: these are programmer bugs for
/// which there is no meaningful caller-side recovery (a worker-pool job
/// mid-execution, a double-build, ...).
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        panic!($($arg)*);
    }};
}
