//! Engine internals for the parallel functional-reactive runtime: the
//! cluster/rank graph builder, the transaction bookkeeping it drives, and
//! the thread-pool executor and planner that schedule transactions across
//! CPUs. The `frp` crate builds the `Cell`/`Stream` combinator surface on
//! top of this crate; nothing here knows about cells or streams.

pub mod cluster;
pub mod error;
pub mod executor;
pub mod node;
pub mod planner;
pub mod pool;
pub mod queue;
pub mod rank;
pub mod runtime;
pub mod tiv;
pub mod transaction;

pub use cluster::Cluster;
pub use error::BuildError;
pub use node::{ClusterId, NodeId, DEFAULT_CLUSTER_ID, UNMANAGED_CLUSTER_ID};
pub use rank::Rank;
pub use runtime::{Runtime, RuntimeConfig};
pub use tiv::{TivKind, TivOps, ValueStore};
pub use transaction::{current_transaction, BeforeUpdateHook, InnerTransaction, JoinHandler, Transaction};
