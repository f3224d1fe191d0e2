//! One file per operator family, the stage structs the [`Flow`] builder
//! methods assemble.

pub(crate) mod also_to;
pub(crate) mod buffered;
pub(crate) mod concat;
pub(crate) mod flatten;
pub(crate) mod grouped;
pub(crate) mod grouped_within;
pub(crate) mod interleave;
pub(crate) mod map;
pub(crate) mod map_concat;
pub(crate) mod map_par;
pub(crate) mod merge;
pub(crate) mod skip;
pub(crate) mod stateful;
pub(crate) mod take;
pub(crate) mod throttle;
pub(crate) mod zip;

use crate::channel::{channel, Closed, Receiver};
use crate::emit::{ChannelEmit, Emit, EmitResult, Stop};
use crate::flow::{Flow, RunCtx};
use crate::scope::Scope;

/// Runs `flow` into a fresh bounded channel on a fork of `scope`. The fork
/// sets the channel's terminal state itself, so receivers never depend on
/// scope cancellation to get unblocked.
pub(crate) fn channelize<T: Send + 'static>(
    scope: &Scope,
    ctx: RunCtx,
    flow: Flow<T>,
    capacity: usize,
) -> Receiver<T> {
    let (tx, rx) = channel(capacity);
    scope.fork(async move {
        let mut emit = ChannelEmit::new(tx.clone());
        match flow.run(ctx, &mut emit).await {
            // Receiver closed early: nothing left to report.
            Ok(()) | Err(Stop::Enough) => tx.done(),
            Err(Stop::Error(e)) => tx.error(e),
        }
        Ok(())
    });
    rx
}

/// Forwards a channel into the downstream emit until the channel's terminal
/// state or a downstream stop.
pub(crate) async fn drain_into<T: Send>(
    mut rx: Receiver<T>,
    emit: &mut dyn Emit<T>,
) -> EmitResult {
    loop {
        match rx.recv().await {
            Ok(value) => emit.emit(value).await?,
            Err(Closed::Done) => return Ok(()),
            Err(Closed::Error(e)) => return Err(Stop::Error(e)),
        }
    }
}
