use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::channel::{channel, Closed, Receiver, Sender};
use crate::emit::{ChannelEmit, Emit, EmitResult, Stop};
use crate::error::FlowError;
use crate::ops;

/// Capacity used for the internal channels of concurrent operators, when not
/// overridden at a specific point with an explicit argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCapacity(usize);

impl BufferCapacity {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be positive");
        BufferCapacity(capacity)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BufferCapacity {
    fn default() -> Self {
        BufferCapacity(16)
    }
}

/// Configuration that flows implicitly through a run: operators that open
/// internal channels read the capacity scoped at their point in the tree.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RunCtx {
    pub(crate) capacity: BufferCapacity,
}

/// One stage of a flow: drives its emissions into the given callback.
#[async_trait]
pub(crate) trait Stage<T: Send>: Send + Sync {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult;
}

/// An immutable, reusable description of an asynchronous sequence of `T`
/// values followed by completion or a single failure.
///
/// A flow does nothing until terminated with one of the `run_*` methods.
/// Sequential operators fuse: a chain of `map`/`filter`/`grouped`/... runs as
/// one task with no buffering between stages. Concurrent operators
/// (`buffered`, `map_par`, `merge`, ...) break the chain with bounded
/// channels and child tasks inside a structured scope, so backpressure and
/// shutdown stay deterministic.
///
/// # Example
/// ```rust
/// use rill::Flow;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let out = Flow::from_iter([1, 2, 3, 4, 5])
///     .filter(|x| x % 2 == 0)
///     .map(|x| x * 10)
///     .run_collect()
///     .await
///     .unwrap();
///
/// assert_eq!(out, vec![20, 40]);
/// # });
/// ```
pub struct Flow<T: Send> {
    pub(crate) stage: Arc<dyn Stage<T>>,
    capacity: Option<BufferCapacity>,
}

impl<T: Send> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Flow {
            stage: Arc::clone(&self.stage),
            capacity: self.capacity,
        }
    }
}

impl<T: Send + 'static> Flow<T> {
    pub(crate) fn from_stage(stage: impl Stage<T> + 'static) -> Self {
        Flow {
            stage: Arc::new(stage),
            capacity: None,
        }
    }

    /// Runs this flow's stage with the scoped configuration, honoring a
    /// capacity override set on this flow.
    pub(crate) async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let ctx = match self.capacity {
            Some(capacity) => RunCtx { capacity },
            None => ctx,
        };
        self.stage.run(ctx, emit).await
    }

    fn root_ctx(&self) -> RunCtx {
        RunCtx {
            capacity: self.capacity.unwrap_or_default(),
        }
    }

    /// Sets the buffer capacity that concurrent operators within this flow
    /// use for their internal channels (default 16).
    pub fn with_buffer_capacity(mut self, capacity: BufferCapacity) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

// Sources.

impl<T: Send + 'static> Flow<T> {
    /// A flow that emits nothing and completes.
    pub fn empty() -> Self {
        Flow::from_stage(EmptyStage)
    }

    /// A flow that immediately fails with `error`.
    pub fn failed(error: FlowError) -> Self {
        Flow::from_stage(FailedStage { error })
    }

    /// A flow driven by an inline emit body: the body receives the emit
    /// callback and performs the emissions itself. This is the extension
    /// point the whole algebra is expressed in terms of.
    ///
    /// ```rust
    /// use futures::FutureExt;
    /// use rill::{Emit, Flow};
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let flow = Flow::from_emit(|emit: &mut dyn Emit<i32>| {
    ///     async move {
    ///         emit.emit(1).await?;
    ///         emit.emit(2).await?;
    ///         Ok(())
    ///     }
    ///     .boxed()
    /// });
    ///
    /// assert_eq!(flow.run_collect().await.unwrap(), vec![1, 2]);
    /// # });
    /// ```
    pub fn from_emit<F>(body: F) -> Self
    where
        F: for<'a> Fn(&'a mut dyn Emit<T>) -> BoxFuture<'a, EmitResult> + Send + Sync + 'static,
    {
        Flow::from_stage(EmitFnStage { body })
    }

    /// A flow that drains an existing channel. Unlike other sources this one
    /// is backed by a live resource, so it can only be run once; a second
    /// run fails.
    pub fn from_channel(receiver: Receiver<T>) -> Self {
        Flow::from_stage(FromChannelStage {
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Concatenates `flows`, running each to completion before the next.
    pub fn concat_all(flows: Vec<Flow<T>>) -> Self {
        Flow::from_stage(ops::concat::ConcatAllStage { flows })
    }

    /// Interleaves `flows` in segments of `segment_size`, taking segments
    /// from each flow in a round-robin. All flows run concurrently. When one
    /// completes: stop if `eager_complete`, otherwise continue with the
    /// remaining flows.
    pub fn interleave_all(flows: Vec<Flow<T>>, segment_size: usize, eager_complete: bool) -> Self {
        assert!(segment_size > 0, "segment_size must be positive");
        Flow::from_stage(ops::interleave::InterleaveStage {
            flows,
            segment_size,
            eager_complete,
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Flow<T> {
    /// A flow over the given elements.
    pub fn from_iter(items: impl IntoIterator<Item = T>) -> Self {
        Flow::from_stage(IterStage {
            items: items.into_iter().collect(),
        })
    }
}

// Sequential operators: these fuse into the upstream task.

impl<T: Send + 'static> Flow<T> {
    /// Transforms each element.
    ///
    /// ```rust
    /// use rill::Flow;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let out = Flow::from_iter([1, 2, 3]).map(|x| x * 2).run_collect().await.unwrap();
    /// assert_eq!(out, vec![2, 4, 6]);
    /// # });
    /// ```
    pub fn map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Flow::from_stage(ops::map::MapStage {
            upstream: self,
            f,
            _out: PhantomData,
        })
    }

    /// Transforms each element with a fallible function; the first error
    /// fails the flow.
    pub fn try_map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
    {
        Flow::from_stage(ops::map::TryMapStage {
            upstream: self,
            f,
            _out: PhantomData,
        })
    }

    /// Keeps only elements satisfying the predicate.
    pub fn filter<P>(self, predicate: P) -> Flow<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Flow::from_stage(ops::map::FilterStage {
            upstream: self,
            predicate,
        })
    }

    /// Transforms elements, dropping those for which `f` returns `None`.
    pub fn filter_map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        Flow::from_stage(ops::map::FilterMapStage {
            upstream: self,
            f,
            _out: PhantomData,
        })
    }

    /// Runs a side effect for each element, passing elements through
    /// unchanged.
    pub fn tap<F>(self, f: F) -> Flow<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Flow::from_stage(ops::map::TapStage { upstream: self, f })
    }

    /// Runs a fallible side effect for each element; an error fails the flow.
    pub fn try_tap<F>(self, f: F) -> Flow<T>
    where
        F: Fn(&T) -> Result<(), FlowError> + Send + Sync + 'static,
    {
        Flow::from_stage(ops::map::TryTapStage { upstream: self, f })
    }

    /// Emits every element of `f(t)`, in order, for each input element.
    pub fn map_concat<U, I, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        Flow::from_stage(ops::map_concat::MapConcatStage {
            upstream: self,
            f: move |value| f(value).into_iter().collect::<Vec<U>>(),
            _out: PhantomData,
        })
    }

    /// Folds elements through a state created per run by `init`, emitting
    /// `f`'s result for each element. `on_complete` sees the final state and
    /// may emit one trailing element.
    pub fn map_stateful<S, U, FI, F, FC>(self, init: FI, f: F, on_complete: FC) -> Flow<U>
    where
        S: Send + 'static,
        U: Send + 'static,
        FI: Fn() -> S + Send + Sync + 'static,
        F: Fn(&mut S, T) -> U + Send + Sync + 'static,
        FC: Fn(S) -> Option<U> + Send + Sync + 'static,
    {
        Flow::from_stage(ops::stateful::MapStatefulStage {
            upstream: self,
            init,
            f,
            on_complete,
            _marker: PhantomData,
        })
    }

    /// Like [`Flow::map_stateful`], but `f` emits any number of elements per
    /// input.
    pub fn map_stateful_concat<S, U, I, FI, F, FC>(self, init: FI, f: F, on_complete: FC) -> Flow<U>
    where
        S: Send + 'static,
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        FI: Fn() -> S + Send + Sync + 'static,
        F: Fn(&mut S, T) -> I + Send + Sync + 'static,
        FC: Fn(S) -> Option<U> + Send + Sync + 'static,
    {
        Flow::from_stage(ops::stateful::MapStatefulConcatStage {
            upstream: self,
            init,
            f: move |state: &mut S, value| f(state, value).into_iter().collect::<Vec<U>>(),
            on_complete,
            _marker: PhantomData,
        })
    }

    /// Emits the first `n` elements, then completes, unwinding the upstream.
    pub fn take(self, n: usize) -> Flow<T> {
        Flow::from_stage(ops::take::TakeStage { upstream: self, n })
    }

    /// Emits elements while the predicate holds; stops at the first failing
    /// element, optionally emitting it first.
    pub fn take_while<P>(self, predicate: P, include_first_failing: bool) -> Flow<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Flow::from_stage(ops::take::TakeWhileStage {
            upstream: self,
            predicate,
            include_first_failing,
        })
    }

    /// Skips the first `n` elements.
    pub fn skip(self, n: usize) -> Flow<T> {
        Flow::from_stage(ops::skip::SkipStage { upstream: self, n })
    }

    /// Buffers elements into groups of exactly `n`; the last group may be
    /// smaller.
    ///
    /// ```rust
    /// use rill::Flow;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let out = Flow::from_iter([1, 2, 3, 4, 5]).grouped(2).run_collect().await.unwrap();
    /// assert_eq!(out, vec![vec![1, 2], vec![3, 4], vec![5]]);
    /// # });
    /// ```
    pub fn grouped(self, n: usize) -> Flow<Vec<T>> {
        assert!(n > 0, "group size must be positive");
        Flow::from_stage(ops::grouped::GroupedWeightedStage {
            upstream: self,
            min_weight: n as u64,
            cost: |_: &T| Ok::<u64, FlowError>(1),
        })
    }

    /// Buffers elements until their cumulative cost reaches `min_weight`;
    /// the last group may be lighter.
    pub fn grouped_weighted<F>(self, min_weight: u64, cost: F) -> Flow<Vec<T>>
    where
        F: Fn(&T) -> Result<u64, FlowError> + Send + Sync + 'static,
    {
        assert!(min_weight > 0, "min_weight must be positive");
        Flow::from_stage(ops::grouped::GroupedWeightedStage {
            upstream: self,
            min_weight,
            cost,
        })
    }

    /// Runs the alternative flow if this one completes without having
    /// emitted a single element. Failures are not recovered.
    pub fn or_else(self, alternative: Flow<T>) -> Flow<T> {
        Flow::from_stage(ops::concat::OrElseStage {
            upstream: self,
            alternative,
        })
    }

    /// Runs this flow, then `other`.
    pub fn concat(self, other: Flow<T>) -> Flow<T> {
        Flow::concat_all(vec![self, other])
    }

    /// Runs `other`, then this flow.
    pub fn prepend(self, other: Flow<T>) -> Flow<T> {
        Flow::concat_all(vec![other, self])
    }

    /// Limits throughput to at most `elements` per `per` by sleeping between
    /// emissions; the measured rate includes downstream emission time.
    pub fn throttle(self, elements: usize, per: Duration) -> Flow<T> {
        assert!(elements > 0, "throttle elements must be positive");
        assert!(per.as_millis() >= 1, "throttle period must be at least 1ms");
        Flow::from_stage(ops::throttle::ThrottleStage {
            upstream: self,
            interval: per / elements as u32,
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Flow<T> {
    /// Injects a separator between successive elements.
    pub fn intersperse(self, inject: T) -> Flow<T> {
        Flow::from_stage(ops::map_concat::IntersperseStage {
            upstream: self,
            start: None,
            inject,
            end: None,
        })
    }

    /// Injects a separator between successive elements, plus a leading and a
    /// trailing element.
    ///
    /// ```rust
    /// use rill::Flow;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let out = Flow::from_iter(["1", "2", "3"])
    ///     .intersperse_with_ends("[", ",", "]")
    ///     .run_collect()
    ///     .await
    ///     .unwrap();
    /// assert_eq!(out, vec!["[", "1", ",", "2", ",", "3", "]"]);
    /// # });
    /// ```
    pub fn intersperse_with_ends(self, start: T, inject: T, end: T) -> Flow<T> {
        Flow::from_stage(ops::map_concat::IntersperseStage {
            upstream: self,
            start: Some(start),
            inject,
            end: Some(end),
        })
    }

    /// Emits overlapping windows of `n` elements, advancing by `step`. A
    /// final partial window is emitted only if its elements were not already
    /// part of an emitted window.
    pub fn sliding(self, n: usize, step: usize) -> Flow<Vec<T>> {
        assert!(n > 0, "window size must be positive");
        assert!(step > 0, "step must be positive");
        Flow::from_stage(ops::grouped::SlidingStage {
            upstream: self,
            n,
            step,
        })
    }
}

// Concurrent operators: these open channels between tasks.

impl<T: Send + 'static> Flow<T> {
    /// Decouples upstream from downstream with a bounded buffer of the
    /// scoped [`BufferCapacity`], letting the upstream run ahead.
    pub fn buffered(self) -> Flow<T> {
        Flow::from_stage(ops::buffered::BufferedStage { upstream: self })
    }

    /// Transforms elements with up to `parallelism` concurrent invocations
    /// of `f`, emitting results in input order.
    ///
    /// ```rust
    /// use rill::Flow;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let out = Flow::from_iter(1..=10)
    ///     .map_par(3, |x| async move { Ok(x + 1) })
    ///     .run_collect()
    ///     .await
    ///     .unwrap();
    /// assert_eq!(out, (2..=11).collect::<Vec<_>>());
    /// # });
    /// ```
    pub fn map_par<U, F, Fut>(self, parallelism: usize, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, FlowError>> + Send + 'static,
    {
        assert!(parallelism > 0, "parallelism must be positive");
        Flow::from_stage(ops::map_par::MapParStage {
            upstream: self,
            parallelism,
            f: Arc::new(move |value| f(value).boxed()),
        })
    }

    /// Like [`Flow::map_par`], but emits results in completion order.
    pub fn map_par_unordered<U, F, Fut>(self, parallelism: usize, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, FlowError>> + Send + 'static,
    {
        assert!(parallelism > 0, "parallelism must be positive");
        Flow::from_stage(ops::map_par::MapParUnorderedStage {
            upstream: self,
            parallelism,
            f: Arc::new(move |value| f(value).boxed()),
        })
    }

    /// Runs both flows concurrently, emitting elements as they arrive. When
    /// one side completes, the other is drained; either side's failure fails
    /// the merged flow.
    pub fn merge(self, other: Flow<T>) -> Flow<T> {
        Flow::from_stage(ops::merge::MergeStage {
            left: self,
            right: other,
        })
    }

    /// Alternates between this flow and `other` in segments of
    /// `segment_size`. See [`Flow::interleave_all`].
    pub fn interleave(self, other: Flow<T>, segment_size: usize, eager_complete: bool) -> Flow<T> {
        Flow::interleave_all(vec![self, other], segment_size, eager_complete)
    }

    /// Pairs elements positionally; completes when either side completes.
    pub fn zip<U>(self, other: Flow<U>) -> Flow<(T, U)>
    where
        U: Send + 'static,
    {
        Flow::from_stage(ops::zip::ZipStage {
            left: self,
            right: other,
        })
    }

    /// Pairs elements positionally until both sides complete, substituting
    /// the given defaults for whichever side finished early.
    pub fn zip_all<U>(self, other: Flow<U>, this_default: T, other_default: U) -> Flow<(T, U)>
    where
        T: Clone + Sync,
        U: Clone + Send + Sync + 'static,
    {
        Flow::from_stage(ops::zip::ZipAllStage {
            left: self,
            right: other,
            left_default: this_default,
            right_default: other_default,
        })
    }

    /// Groups up to `n` elements, flushing early when `duration` elapses
    /// since the group started. Empty windows are never emitted.
    pub fn grouped_within(self, n: usize, duration: Duration) -> Flow<Vec<T>> {
        assert!(n > 0, "group size must be positive");
        self.grouped_weighted_within(n as u64, duration, |_| Ok(1))
    }

    /// Groups elements until their cumulative cost reaches `min_weight`,
    /// flushing early when `duration` elapses since the group started.
    /// Empty windows are never emitted.
    pub fn grouped_weighted_within<F>(
        self,
        min_weight: u64,
        duration: Duration,
        cost: F,
    ) -> Flow<Vec<T>>
    where
        F: Fn(&T) -> Result<u64, FlowError> + Send + Sync + 'static,
    {
        assert!(min_weight > 0, "min_weight must be positive");
        assert!(duration > Duration::ZERO, "duration must be positive");
        Flow::from_stage(ops::grouped_within::GroupedWeightedWithinStage {
            upstream: self,
            min_weight,
            duration,
            cost,
        })
    }
}

impl<T: Clone + Send + 'static> Flow<T> {
    /// Sends every element to `sink` as well as downstream. The sink is
    /// closed with `done` on completion and with the flow's error on
    /// failure; a sink that fails or closes mid-stream fails the flow.
    pub fn also_to(self, sink: Sender<T>) -> Flow<T> {
        Flow::from_stage(ops::also_to::AlsoToStage {
            upstream: self,
            sink,
        })
    }

    /// Like [`Flow::also_to`], but never blocks on the sink: elements the
    /// sink cannot accept right now are dropped for it, and a closed or
    /// failed sink does not fail the flow.
    pub fn also_to_tap(self, sink: Sender<T>) -> Flow<T> {
        Flow::from_stage(ops::also_to::AlsoToTapStage {
            upstream: self,
            sink,
        })
    }
}

impl<T: Send + 'static> Flow<Flow<T>> {
    /// Runs every child flow as it arrives, emitting their elements in
    /// arrival order. Completes when the outer flow and all children have
    /// completed; any failure fails the result.
    pub fn flatten(self) -> Flow<T> {
        Flow::from_stage(ops::flatten::FlattenStage { upstream: self })
    }
}

// Terminal operations.

impl<T: Send + 'static> Flow<T> {
    /// Runs the flow, collecting every element.
    pub async fn run_collect(&self) -> Result<Vec<T>, FlowError> {
        struct Collect<T>(Vec<T>);

        #[async_trait]
        impl<T: Send> Emit<T> for Collect<T> {
            async fn emit(&mut self, value: T) -> EmitResult {
                self.0.push(value);
                Ok(())
            }
        }

        let mut sink = Collect(Vec::new());
        finish(self.run(self.root_ctx(), &mut sink).await)?;
        Ok(sink.0)
    }

    /// Runs the flow, discarding elements.
    pub async fn run_drain(&self) -> Result<(), FlowError> {
        struct Drain;

        #[async_trait]
        impl<T: Send + 'static> Emit<T> for Drain {
            async fn emit(&mut self, _value: T) -> EmitResult {
                Ok(())
            }
        }

        finish(self.run(self.root_ctx(), &mut Drain).await)
    }

    /// Runs the flow, folding every element into `init`.
    pub async fn run_fold<S, F>(&self, init: S, f: F) -> Result<S, FlowError>
    where
        S: Send + 'static,
        F: FnMut(S, T) -> S + Send,
    {
        struct Fold<S, F> {
            state: Option<S>,
            f: F,
        }

        #[async_trait]
        impl<T: Send + 'static, S: Send, F: FnMut(S, T) -> S + Send> Emit<T> for Fold<S, F> {
            async fn emit(&mut self, value: T) -> EmitResult {
                let state = self.state.take();
                if let Some(state) = state {
                    self.state = Some((self.f)(state, value));
                }
                Ok(())
            }
        }

        let mut sink = Fold {
            state: Some(init),
            f,
        };
        finish(self.run(self.root_ctx(), &mut sink).await)?;
        match sink.state {
            Some(state) => Ok(state),
            None => Err(FlowError::message("fold state lost")),
        }
    }

    /// Runs the flow, applying `f` to every element.
    pub async fn run_for_each<F>(&self, f: F) -> Result<(), FlowError>
    where
        F: FnMut(T) + Send,
    {
        struct ForEach<F>(F);

        #[async_trait]
        impl<T: Send + 'static, F: FnMut(T) + Send> Emit<T> for ForEach<F> {
            async fn emit(&mut self, value: T) -> EmitResult {
                (self.0)(value);
                Ok(())
            }
        }

        finish(self.run(self.root_ctx(), &mut ForEach(f)).await)
    }

    /// Materializes the flow into a channel drained by the caller. The
    /// channel is closed with `done` on completion and `error` on failure.
    pub fn run_to_channel(self) -> Receiver<T> {
        let ctx = self.root_ctx();
        let (tx, rx) = channel(ctx.capacity.get());
        tokio::spawn(async move {
            let mut emit = ChannelEmit::new(tx.clone());
            match self.run(ctx, &mut emit).await {
                Ok(()) | Err(Stop::Enough) => tx.done(),
                Err(Stop::Error(e)) => tx.error(e),
            }
        });
        rx
    }
}

fn finish(result: EmitResult) -> Result<(), FlowError> {
    match result {
        Ok(()) | Err(Stop::Enough) => Ok(()),
        Err(Stop::Error(e)) => Err(e),
    }
}

// Source stages.

struct EmptyStage;

#[async_trait]
impl<T: Send> Stage<T> for EmptyStage {
    async fn run(&self, _ctx: RunCtx, _emit: &mut dyn Emit<T>) -> EmitResult {
        Ok(())
    }
}

struct FailedStage {
    error: FlowError,
}

#[async_trait]
impl<T: Send> Stage<T> for FailedStage {
    async fn run(&self, _ctx: RunCtx, _emit: &mut dyn Emit<T>) -> EmitResult {
        Err(Stop::Error(self.error.clone()))
    }
}

struct IterStage<T> {
    items: Vec<T>,
}

#[async_trait]
impl<T: Clone + Send + Sync> Stage<T> for IterStage<T> {
    async fn run(&self, _ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        for item in &self.items {
            emit.emit(item.clone()).await?;
        }
        Ok(())
    }
}

struct EmitFnStage<F> {
    body: F,
}

#[async_trait]
impl<T, F> Stage<T> for EmitFnStage<F>
where
    T: Send,
    F: for<'a> Fn(&'a mut dyn Emit<T>) -> BoxFuture<'a, EmitResult> + Send + Sync,
{
    async fn run(&self, _ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        (self.body)(emit).await
    }
}

struct FromChannelStage<T> {
    receiver: Mutex<Option<Receiver<T>>>,
}

#[async_trait]
impl<T: Send> Stage<T> for FromChannelStage<T> {
    async fn run(&self, _ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            return Err(Stop::Error(FlowError::message(
                "a channel-backed flow can only be run once",
            )));
        };
        loop {
            match receiver.recv().await {
                Ok(value) => emit.emit(value).await?,
                Err(Closed::Done) => return Ok(()),
                Err(Closed::Error(e)) => return Err(Stop::Error(e)),
            }
        }
    }
}
