use std::marker::PhantomData;

use async_trait::async_trait;

use crate::emit::{Emit, EmitResult};
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct MapStatefulStage<T: Send, S, U, FI, F, FC> {
    pub(crate) upstream: Flow<T>,
    pub(crate) init: FI,
    pub(crate) f: F,
    pub(crate) on_complete: FC,
    pub(crate) _marker: PhantomData<fn() -> (S, U)>,
}

#[async_trait]
impl<T, S, U, FI, F, FC> Stage<U> for MapStatefulStage<T, S, U, FI, F, FC>
where
    T: Send + 'static,
    S: Send + 'static,
    U: Send + 'static,
    FI: Fn() -> S + Send + Sync,
    F: Fn(&mut S, T) -> U + Send + Sync,
    FC: Fn(S) -> Option<U> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        // Fresh state per run keeps the flow reusable.
        let mut wrapper = MapStatefulEmit {
            downstream: emit,
            f: &self.f,
            state: (self.init)(),
            _in: PhantomData,
        };
        self.upstream.run(ctx, &mut wrapper).await?;
        let MapStatefulEmit {
            downstream, state, ..
        } = wrapper;
        if let Some(last) = (self.on_complete)(state) {
            downstream.emit(last).await?;
        }
        Ok(())
    }
}

struct MapStatefulEmit<'a, T, S, U: Send, F> {
    downstream: &'a mut dyn Emit<U>,
    f: &'a F,
    state: S,
    _in: PhantomData<fn(T)>,
}

#[async_trait]
impl<'a, T, S, U, F> Emit<T> for MapStatefulEmit<'a, T, S, U, F>
where
    T: Send,
    S: Send,
    U: Send,
    F: Fn(&mut S, T) -> U + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        let mapped = (self.f)(&mut self.state, value);
        self.downstream.emit(mapped).await
    }
}

pub(crate) struct MapStatefulConcatStage<T: Send, S, U, FI, F, FC> {
    pub(crate) upstream: Flow<T>,
    pub(crate) init: FI,
    pub(crate) f: F,
    pub(crate) on_complete: FC,
    pub(crate) _marker: PhantomData<fn() -> (S, U)>,
}

#[async_trait]
impl<T, S, U, FI, F, FC> Stage<U> for MapStatefulConcatStage<T, S, U, FI, F, FC>
where
    T: Send + 'static,
    S: Send + 'static,
    U: Send + 'static,
    FI: Fn() -> S + Send + Sync,
    F: Fn(&mut S, T) -> Vec<U> + Send + Sync,
    FC: Fn(S) -> Option<U> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        let mut wrapper = MapStatefulConcatEmit {
            downstream: emit,
            f: &self.f,
            state: (self.init)(),
            _in: PhantomData,
        };
        self.upstream.run(ctx, &mut wrapper).await?;
        let MapStatefulConcatEmit {
            downstream, state, ..
        } = wrapper;
        if let Some(last) = (self.on_complete)(state) {
            downstream.emit(last).await?;
        }
        Ok(())
    }
}

struct MapStatefulConcatEmit<'a, T, S, U: Send, F> {
    downstream: &'a mut dyn Emit<U>,
    f: &'a F,
    state: S,
    _in: PhantomData<fn(T)>,
}

#[async_trait]
impl<'a, T, S, U, F> Emit<T> for MapStatefulConcatEmit<'a, T, S, U, F>
where
    T: Send,
    S: Send,
    U: Send,
    F: Fn(&mut S, T) -> Vec<U> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        for element in (self.f)(&mut self.state, value) {
            self.downstream.emit(element).await?;
        }
        Ok(())
    }
}
