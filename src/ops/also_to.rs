use async_trait::async_trait;

use crate::channel::{Closed, Sender};
use crate::emit::{Emit, EmitResult, Stop};
use crate::error::FlowError;
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct AlsoToStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) sink: Sender<T>,
}

#[async_trait]
impl<T: Clone + Send + 'static> Stage<T> for AlsoToStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = AlsoToEmit {
            downstream: emit,
            sink: &self.sink,
        };
        let result = self.upstream.run(ctx, &mut wrapper).await;
        match &result {
            Ok(()) | Err(Stop::Enough) => self.sink.done(),
            Err(Stop::Error(e)) => self.sink.error(e.clone()),
        }
        result
    }
}

struct AlsoToEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<T>,
    sink: &'a Sender<T>,
}

#[async_trait]
impl<'a, T: Clone + Send> Emit<T> for AlsoToEmit<'a, T> {
    async fn emit(&mut self, value: T) -> EmitResult {
        // Downstream first; a downstream failure is reported to the sink
        // before it propagates.
        match self.downstream.emit(value.clone()).await {
            Ok(()) => {}
            Err(Stop::Enough) => {
                self.sink.done();
                return Err(Stop::Enough);
            }
            Err(Stop::Error(e)) => {
                self.sink.error(e.clone());
                return Err(Stop::Error(e));
            }
        }
        match self.sink.send(value).await {
            Ok(()) => Ok(()),
            Err(Closed::Done) => Err(Stop::Error(FlowError::SinkClosed)),
            Err(Closed::Error(e)) => Err(Stop::Error(e)),
        }
    }
}

pub(crate) struct AlsoToTapStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) sink: Sender<T>,
}

#[async_trait]
impl<T: Clone + Send + 'static> Stage<T> for AlsoToTapStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = AlsoToTapEmit {
            downstream: emit,
            sink: &self.sink,
        };
        let result = self.upstream.run(ctx, &mut wrapper).await;
        match &result {
            Ok(()) | Err(Stop::Enough) => self.sink.done(),
            Err(Stop::Error(e)) => self.sink.error(e.clone()),
        }
        result
    }
}

struct AlsoToTapEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<T>,
    sink: &'a Sender<T>,
}

#[async_trait]
impl<'a, T: Clone + Send> Emit<T> for AlsoToTapEmit<'a, T> {
    async fn emit(&mut self, value: T) -> EmitResult {
        self.downstream.emit(value.clone()).await?;
        // Best-effort: a full or closed sink just misses this element.
        let _ = self.sink.try_send(value);
        Ok(())
    }
}
