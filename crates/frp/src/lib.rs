//! `Cell`/`Stream` combinator surface for the parallel functional-reactive
//! runtime in `frp-core`. Ported from `original_source/src/prf/cell.hpp`
//! and `stream.hpp`: a `Cell<T>` always has a current value, a `Stream<T>`
//! fires at most once per transaction. Everything here is built from the
//! wiring primitives in [`base`] on top of `frp-core`'s cluster/rank graph
//! and transaction executor; this crate owns no scheduling of its own.

pub mod base;
pub mod cell;
mod listener;
pub mod stream;

#[cfg(test)]
mod tests;

pub use cell::{lift2, lift3, Cell, CellLoop, CellSink, GlobalCellLoop};
pub use listener::Listener;
pub use stream::{Stream, StreamLoop, StreamSink};

pub use frp_core::{BuildError, Cluster, JoinHandler, Runtime, RuntimeConfig, Transaction};
