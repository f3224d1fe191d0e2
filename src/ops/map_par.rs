use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::channel::{channel, Closed, Sender};
use crate::emit::{Emit, EmitResult, Stop};
use crate::error::FlowError;
use crate::flow::{Flow, RunCtx, Stage};
use crate::ops::drain_into;
use crate::scope::{supervised, Fork, Scope};

/// The user mapping function, with its future boxed so stages and forks can
/// store it without naming its concrete type.
pub(crate) type MapFn<T, U> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<U, FlowError>> + Send + Sync>;

/// Ordered parallel mapping: a producer spawns one mapping fork per element
/// (bounded by a semaphore), enqueues the fork handles in input order, and a
/// collector joins them in that same order into the results channel. A
/// failing fork routes its error straight to the results channel, where it
/// supersedes any buffered results.
pub(crate) struct MapParStage<T: Send, U: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) parallelism: usize,
    pub(crate) f: MapFn<T, U>,
}

#[async_trait]
impl<T, U> Stage<U> for MapParStage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        let scope = Scope::unsupervised();
        let (results_tx, results_rx) = channel::<U>(ctx.capacity.get());
        let (in_progress_tx, mut in_progress_rx) = channel::<Fork<Option<U>>>(self.parallelism);
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        let upstream = self.upstream.clone();
        let producer_scope = scope.clone();
        let producer_results = results_tx.clone();
        let producer_in_progress = in_progress_tx.clone();
        let f = Arc::clone(&self.f);
        scope.fork(async move {
            let mut emit = MappingEmit {
                scope: producer_scope,
                semaphore,
                f,
                results_tx: producer_results.clone(),
                in_progress_tx: producer_in_progress.clone(),
            };
            match upstream.run(ctx, &mut emit).await {
                Ok(()) | Err(Stop::Enough) => {}
                Err(Stop::Error(e)) => producer_results.error(e),
            }
            producer_in_progress.done();
            Ok(())
        });

        let collector_results = results_tx.clone();
        scope.fork(async move {
            loop {
                match in_progress_rx.recv().await {
                    Ok(fork) => match fork.join().await {
                        Ok(Some(value)) => {
                            if collector_results.send(value).await.is_err() {
                                break;
                            }
                        }
                        // The mapping fork already routed its error.
                        Ok(None) => break,
                        // Panic or cancellation of the mapping fork.
                        Err(e) => {
                            collector_results.error(e);
                            break;
                        }
                    },
                    Err(Closed::Done) => {
                        collector_results.done();
                        break;
                    }
                    Err(Closed::Error(_)) => break,
                }
            }
            Ok(())
        });

        let result = drain_into(results_rx, emit).await;
        scope.shutdown().await;
        result
    }
}

struct MappingEmit<T: Send, U: Send> {
    scope: Scope,
    semaphore: Arc<Semaphore>,
    f: MapFn<T, U>,
    results_tx: Sender<U>,
    in_progress_tx: Sender<Fork<Option<U>>>,
}

#[async_trait]
impl<T, U> Emit<T> for MappingEmit<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return Err(Stop::Enough);
        };
        let mapping = (self.f)(value);
        let results_tx = self.results_tx.clone();
        let fork = self.scope.fork_cancellable(async move {
            match mapping.await {
                Ok(mapped) => {
                    drop(permit);
                    Ok(Some(mapped))
                }
                Err(e) => {
                    // Route the failure where the collector and the main
                    // loop will see it. The permit is released when the fork
                    // ends, success or not; with the channel errored the
                    // producer cannot usefully spend it.
                    results_tx.error(e);
                    Ok(None)
                }
            }
        });
        match self.in_progress_tx.send(fork).await {
            Ok(()) => Ok(()),
            // Collector gone: downstream has stopped consuming.
            Err(_) => Err(Stop::Enough),
        }
    }
}

/// Unordered parallel mapping: a supervised inner region owns one user fork
/// per element, each sending its result directly to the results channel in
/// completion order. The region's first failure becomes the channel's error.
pub(crate) struct MapParUnorderedStage<T: Send, U: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) parallelism: usize,
    pub(crate) f: MapFn<T, U>,
}

#[async_trait]
impl<T, U> Stage<U> for MapParUnorderedStage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<U>) -> EmitResult {
        let scope = Scope::unsupervised();
        let (results_tx, results_rx) = channel::<U>(ctx.capacity.get());
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        let upstream = self.upstream.clone();
        let f = Arc::clone(&self.f);
        let outer_results = results_tx.clone();
        scope.fork(async move {
            let fork_results = outer_results.clone();
            let region = supervised(|inner| async move {
                let mut emit = UnorderedMappingEmit {
                    scope: inner,
                    semaphore,
                    f,
                    results_tx: fork_results,
                };
                match upstream.run(ctx, &mut emit).await {
                    Ok(()) | Err(Stop::Enough) => Ok(()),
                    Err(Stop::Error(e)) => Err(e),
                }
            })
            .await;
            match region {
                Ok(()) => outer_results.done(),
                Err(e) => outer_results.error(e),
            }
            Ok(())
        });

        let result = drain_into(results_rx, emit).await;
        scope.shutdown().await;
        result
    }
}

struct UnorderedMappingEmit<T: Send, U: Send> {
    scope: Scope,
    semaphore: Arc<Semaphore>,
    f: MapFn<T, U>,
    results_tx: Sender<U>,
}

#[async_trait]
impl<T, U> Emit<T> for UnorderedMappingEmit<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return Err(Stop::Enough);
        };
        let mapping = (self.f)(value);
        let results_tx = self.results_tx.clone();
        self.scope.fork_user(async move {
            let mapped = mapping.await?;
            // A closed results channel only means downstream stopped
            // consuming; the region winds down cleanly.
            let _ = results_tx.send(mapped).await;
            drop(permit);
            Ok(())
        });
        Ok(())
    }
}
