//! The speculative out-of-order execution engine.
//!
//! [`engine::Core`] owns every structure; each cycle runs the fixed phase
//! order **retire → writeback → issue → dispatch/fetch**. Instructions
//! execute as soon as their operands are ready, possibly many per cycle and
//! far ahead of the retire point; architectural state changes only at
//! retire, and a flush discards everything younger than the rollback point.
//! Cache fills made by flushed μops are deliberately kept; that is the
//! side channel this emulator exists to demonstrate.

/// The engine proper: state, cycle loop, rollback.
pub mod engine;
/// Fetch/decode/rename/dispatch phase.
pub mod fetch;
/// Writeback and issue/execute phase.
pub mod issue;
/// Load-store queue.
pub mod lsq;
/// Rename table and branch checkpoints.
pub mod rename;
/// Retire phase.
pub mod retire;
/// Reorder buffer.
pub mod rob;

pub use engine::{Core, PauseReason, RunState};
pub use rob::{Rob, RobEntry, RobTag};
