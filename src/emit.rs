use async_trait::async_trait;

use crate::channel::{Closed, Sender};
use crate::error::FlowError;

/// Why a stage stopped emitting before its upstream was exhausted.
#[derive(Clone, Debug)]
pub enum Stop {
    /// Downstream has all the elements it needs. The operator that requested
    /// the stop (`take`, `take_while`) converts this back into clean
    /// completion; everything upstream of it just unwinds.
    Enough,
    /// The flow failed. Propagates all the way to the terminal sink.
    Error(FlowError),
}

/// Result of pushing one element downstream, and of running a whole stage.
pub type EmitResult = Result<(), Stop>;

/// The push side of a fused pipeline.
///
/// A chain of sequential operators is a chain of `Emit` wrappers threaded
/// through a single task: each operator's wrapper transforms the element and
/// forwards it to the wrapper below, with no buffering in between. `emit`
/// suspends while downstream applies backpressure.
#[async_trait]
pub trait Emit<T: Send>: Send {
    async fn emit(&mut self, value: T) -> EmitResult;
}

/// An emit that forwards into a channel. Concurrent operators use it to run
/// an upstream into a mailbox owned by another task.
pub(crate) struct ChannelEmit<T> {
    tx: Sender<T>,
}

impl<T> ChannelEmit<T> {
    pub(crate) fn new(tx: Sender<T>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl<T: Send> Emit<T> for ChannelEmit<T> {
    async fn emit(&mut self, value: T) -> EmitResult {
        match self.tx.send(value).await {
            Ok(()) => Ok(()),
            // Receiver is gone or closed cleanly: upstream should unwind as
            // if downstream had enough.
            Err(Closed::Done) => Err(Stop::Enough),
            Err(Closed::Error(e)) => Err(Stop::Error(e)),
        }
    }
}
