use std::mem;

use async_trait::async_trait;

use crate::emit::{Emit, EmitResult, Stop};
use crate::error::FlowError;
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct GroupedWeightedStage<T: Send, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) min_weight: u64,
    pub(crate) cost: F,
}

#[async_trait]
impl<T, F> Stage<Vec<T>> for GroupedWeightedStage<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> Result<u64, FlowError> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<Vec<T>>) -> EmitResult {
        let mut wrapper = GroupedWeightedEmit {
            downstream: emit,
            cost: &self.cost,
            min_weight: self.min_weight,
            buffer: Vec::new(),
            accumulated: 0,
        };
        self.upstream.run(ctx, &mut wrapper).await?;
        if !wrapper.buffer.is_empty() {
            let last = mem::take(&mut wrapper.buffer);
            wrapper.downstream.emit(last).await?;
        }
        Ok(())
    }
}

struct GroupedWeightedEmit<'a, T: Send, F> {
    downstream: &'a mut dyn Emit<Vec<T>>,
    cost: &'a F,
    min_weight: u64,
    buffer: Vec<T>,
    accumulated: u64,
}

#[async_trait]
impl<'a, T, F> Emit<T> for GroupedWeightedEmit<'a, T, F>
where
    T: Send,
    F: Fn(&T) -> Result<u64, FlowError> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        match (self.cost)(&value) {
            Ok(cost) => self.accumulated += cost,
            Err(e) => return Err(Stop::Error(e)),
        }
        self.buffer.push(value);
        if self.accumulated >= self.min_weight {
            self.accumulated = 0;
            let group = mem::take(&mut self.buffer);
            self.downstream.emit(group).await?;
        }
        Ok(())
    }
}

pub(crate) struct SlidingStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) n: usize,
    pub(crate) step: usize,
}

#[async_trait]
impl<T> Stage<Vec<T>> for SlidingStage<T>
where
    T: Clone + Send + 'static,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<Vec<T>>) -> EmitResult {
        let mut wrapper = SlidingEmit {
            downstream: emit,
            n: self.n,
            step: self.step,
            buffer: Vec::new(),
            to_skip: 0,
            fresh: false,
        };
        self.upstream.run(ctx, &mut wrapper).await?;
        // A trailing partial window is emitted only if it holds elements that
        // were not already part of an emitted window.
        if !wrapper.buffer.is_empty() && wrapper.fresh {
            let last = mem::take(&mut wrapper.buffer);
            wrapper.downstream.emit(last).await?;
        }
        Ok(())
    }
}

struct SlidingEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<Vec<T>>,
    n: usize,
    step: usize,
    buffer: Vec<T>,
    to_skip: usize,
    fresh: bool,
}

#[async_trait]
impl<'a, T> Emit<T> for SlidingEmit<'a, T>
where
    T: Clone + Send,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        if self.to_skip > 0 {
            // With step > n there are gaps between windows.
            self.to_skip -= 1;
            return Ok(());
        }
        self.buffer.push(value);
        self.fresh = true;
        if self.buffer.len() == self.n {
            self.downstream.emit(self.buffer.clone()).await?;
            self.fresh = false;
            if self.step >= self.n {
                self.buffer.clear();
                self.to_skip = self.step - self.n;
            } else {
                self.buffer.drain(..self.step);
            }
        }
        Ok(())
    }
}
