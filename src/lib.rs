//! Eager, channel-backed streaming combinators for Rust.
//!
//! A [`Flow`] is a deferred, reusable description of an asynchronous
//! sequence of values ending in completion or a single failure. Nothing runs
//! until the flow is terminated with one of the `run_*` methods.
//!
//! Main features:
//!
//! - Sequential operators fuse: a chain of `map`/`filter`/`grouped`/... runs
//!   as a single task with zero buffering between stages
//! - Explicit concurrency, ordering, and backpressure control for the
//!   parallel operators (`map_par`, `map_par_unordered`, `merge`, `flatten`)
//! - Bounded channels everywhere, so a slow consumer always slows the
//!   producer down instead of growing memory
//! - Deterministic shutdown: every operator that starts tasks or timers
//!   cancels them on all exit paths, and errors propagate to the terminal
//!   sink with the first failure winning
//! - Builds on top of Tokio tasks and a small structured-concurrency layer
//!
//! Example:
//!
//! ```rust
//! use rill::Flow;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let out = Flow::from_iter(1..=10)
//!     .filter(|x| x % 2 == 0)
//!     .map_par(3, |x| async move { Ok(x * 10) })
//!     .grouped(2)
//!     .run_collect()
//!     .await
//!     .unwrap();
//!
//! assert_eq!(out, vec![vec![20, 40], vec![60, 80], vec![100]]);
//! # });
//! ```
//!
//! ## Flows, emits and channels
//!
//! Running a flow threads an emit callback through the fused stages: each
//! sequential operator wraps the callback of the stage below it, so an
//! element travels the whole chain in one call stack. Concurrent operators
//! break the chain instead: they run the upstream into a bounded
//! [`channel`] on a child task and drain it from the consuming side, inside
//! a [`Scope`] that cancels and drains every child on the way out.
//!
//! Channels distinguish clean completion (`done`) from failure (`error`):
//! receivers drain buffered elements before observing `Done`, while an error
//! discards the buffer and surfaces immediately.
//!
//! ## Buffer sizes
//!
//! Operators that open internal channels size them with the
//! [`BufferCapacity`] in scope (default 16); override it for a subtree with
//! [`Flow::with_buffer_capacity`].

mod channel;
mod emit;
mod error;
mod flow;
mod ops;
mod scope;

#[cfg(test)]
mod test_utils;

pub use channel::{channel, Closed, Receiver, Sender, TrySendError};
pub use emit::{Emit, EmitResult, Stop};
pub use error::FlowError;
pub use flow::{BufferCapacity, Flow};
pub use scope::{supervised, unsupervised, Fork, Scope};
