use std::marker::PhantomData;

use async_trait::async_trait;

use crate::emit::{Emit, EmitResult};
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct MapConcatStage<T: Send, U, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) f: F,
    pub(crate) _out: PhantomData<fn() -> U>,
}

#[async_trait]
impl<T, U, F> Stage<U> for MapConcatStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Vec<U> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        let mut emit = MapConcatEmit {
            downstream: emit,
            f: &self.f,
            _in: PhantomData,
        };
        self.upstream.run(ctx, &mut emit).await
    }
}

struct MapConcatEmit<'a, T, U: Send, F> {
    downstream: &'a mut dyn Emit<U>,
    f: &'a F,
    _in: PhantomData<fn(T)>,
}

#[async_trait]
impl<'a, T, U, F> Emit<T> for MapConcatEmit<'a, T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Vec<U> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        for element in (self.f)(value) {
            self.downstream.emit(element).await?;
        }
        Ok(())
    }
}

pub(crate) struct IntersperseStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) start: Option<T>,
    pub(crate) inject: T,
    pub(crate) end: Option<T>,
}

#[async_trait]
impl<T> Stage<T> for IntersperseStage<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = IntersperseEmit {
            downstream: emit,
            start: self.start.clone(),
            inject: self.inject.clone(),
            started: false,
        };
        self.upstream.run(ctx, &mut wrapper).await?;
        let started = wrapper.started;
        if !started {
            if let Some(start) = self.start.clone() {
                wrapper.downstream.emit(start).await?;
            }
        }
        if let Some(end) = self.end.clone() {
            wrapper.downstream.emit(end).await?;
        }
        Ok(())
    }
}

struct IntersperseEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<T>,
    start: Option<T>,
    inject: T,
    started: bool,
}

#[async_trait]
impl<'a, T> Emit<T> for IntersperseEmit<'a, T>
where
    T: Clone + Send,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        if self.started {
            self.downstream.emit(self.inject.clone()).await?;
        } else {
            self.started = true;
            if let Some(start) = self.start.take() {
                self.downstream.emit(start).await?;
            }
        }
        self.downstream.emit(value).await
    }
}
