use std::marker::PhantomData;

use async_trait::async_trait;

use crate::emit::{Emit, EmitResult, Stop};
use crate::error::FlowError;
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct MapStage<T: Send, U, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) f: F,
    pub(crate) _out: PhantomData<fn() -> U>,
}

#[async_trait]
impl<T, U, F> Stage<U> for MapStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        let mut emit = MapEmit {
            downstream: emit,
            f: &self.f,
            _in: PhantomData,
        };
        self.upstream.run(ctx, &mut emit).await
    }
}

struct MapEmit<'a, T, U: Send, F> {
    downstream: &'a mut dyn Emit<U>,
    f: &'a F,
    _in: PhantomData<fn(T)>,
}

#[async_trait]
impl<'a, T, U, F> Emit<T> for MapEmit<'a, T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> U + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        self.downstream.emit((self.f)(value)).await
    }
}

pub(crate) struct TryMapStage<T: Send, U, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) f: F,
    pub(crate) _out: PhantomData<fn() -> U>,
}

#[async_trait]
impl<T, U, F> Stage<U> for TryMapStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, FlowError> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        let mut emit = TryMapEmit {
            downstream: emit,
            f: &self.f,
            _in: PhantomData,
        };
        self.upstream.run(ctx, &mut emit).await
    }
}

struct TryMapEmit<'a, T, U: Send, F> {
    downstream: &'a mut dyn Emit<U>,
    f: &'a F,
    _in: PhantomData<fn(T)>,
}

#[async_trait]
impl<'a, T, U, F> Emit<T> for TryMapEmit<'a, T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<U, FlowError> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        match (self.f)(value) {
            Ok(mapped) => self.downstream.emit(mapped).await,
            Err(e) => Err(Stop::Error(e)),
        }
    }
}

pub(crate) struct FilterStage<T: Send, P> {
    pub(crate) upstream: Flow<T>,
    pub(crate) predicate: P,
}

#[async_trait]
impl<T, P> Stage<T> for FilterStage<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut emit = FilterEmit {
            downstream: emit,
            predicate: &self.predicate,
        };
        self.upstream.run(ctx, &mut emit).await
    }
}

struct FilterEmit<'a, T: Send, P> {
    downstream: &'a mut dyn Emit<T>,
    predicate: &'a P,
}

#[async_trait]
impl<'a, T, P> Emit<T> for FilterEmit<'a, T, P>
where
    T: Send,
    P: Fn(&T) -> bool + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        if (self.predicate)(&value) {
            self.downstream.emit(value).await
        } else {
            Ok(())
        }
    }
}

pub(crate) struct FilterMapStage<T: Send, U, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) f: F,
    pub(crate) _out: PhantomData<fn() -> U>,
}

#[async_trait]
impl<T, U, F> Stage<U> for FilterMapStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Option<U> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        let mut emit = FilterMapEmit {
            downstream: emit,
            f: &self.f,
            _in: PhantomData,
        };
        self.upstream.run(ctx, &mut emit).await
    }
}

struct FilterMapEmit<'a, T, U: Send, F> {
    downstream: &'a mut dyn Emit<U>,
    f: &'a F,
    _in: PhantomData<fn(T)>,
}

#[async_trait]
impl<'a, T, U, F> Emit<T> for FilterMapEmit<'a, T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Option<U> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        match (self.f)(value) {
            Some(mapped) => self.downstream.emit(mapped).await,
            None => Ok(()),
        }
    }
}

pub(crate) struct TapStage<T: Send, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) f: F,
}

#[async_trait]
impl<T, F> Stage<T> for TapStage<T, F>
where
    T: Send + 'static,
    F: Fn(&T) + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut emit = TapEmit {
            downstream: emit,
            f: &self.f,
        };
        self.upstream.run(ctx, &mut emit).await
    }
}

struct TapEmit<'a, T: Send, F> {
    downstream: &'a mut dyn Emit<T>,
    f: &'a F,
}

#[async_trait]
impl<'a, T, F> Emit<T> for TapEmit<'a, T, F>
where
    T: Send,
    F: Fn(&T) + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        (self.f)(&value);
        self.downstream.emit(value).await
    }
}

pub(crate) struct TryTapStage<T: Send, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) f: F,
}

#[async_trait]
impl<T, F> Stage<T> for TryTapStage<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> Result<(), FlowError> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut emit = TryTapEmit {
            downstream: emit,
            f: &self.f,
        };
        self.upstream.run(ctx, &mut emit).await
    }
}

struct TryTapEmit<'a, T: Send, F> {
    downstream: &'a mut dyn Emit<T>,
    f: &'a F,
}

#[async_trait]
impl<'a, T, F> Emit<T> for TryTapEmit<'a, T, F>
where
    T: Send,
    F: Fn(&T) -> Result<(), FlowError> + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        match (self.f)(&value) {
            Ok(()) => self.downstream.emit(value).await,
            Err(e) => Err(Stop::Error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::FlowError;
    use crate::flow::Flow;

    #[tokio::test]
    async fn map_transforms_every_element() {
        let out = Flow::from_iter([1, 2, 3])
            .map(|x| x * 2)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn try_map_fails_the_flow_on_the_first_error() {
        let result = Flow::from_iter([1, 2, 3])
            .try_map(|x| {
                if x == 2 {
                    Err(FlowError::message("two is not supported"))
                } else {
                    Ok(x)
                }
            })
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "two is not supported");
    }

    #[tokio::test]
    async fn filter_keeps_matching_elements() {
        let out = Flow::from_iter(1..=6)
            .filter(|x| x % 2 == 0)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn filter_map_drops_none_results() {
        let out = Flow::from_iter(1..=4)
            .filter_map(|x| (x % 2 == 0).then_some(x * 10))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![20, 40]);
    }

    #[tokio::test]
    async fn tap_sees_every_element_and_passes_them_through() {
        let seen = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&seen);
        let out = Flow::from_iter([1, 2, 3])
            .tap(move |_| {
                probe.fetch_add(1, Ordering::SeqCst);
            })
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn try_tap_failure_fails_the_flow() {
        let result = Flow::from_iter([1, 2, 3])
            .try_tap(|x| {
                if *x == 3 {
                    Err(FlowError::message("tap failed"))
                } else {
                    Ok(())
                }
            })
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "tap failed");
    }
}
