use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};

use crate::channel::{channel, Closed};
use crate::emit::{ChannelEmit, Emit, EmitResult, Stop};
use crate::flow::{Flow, RunCtx, Stage};
use crate::ops::{channelize, drain_into};
use crate::scope::Scope;

/// Flattens a flow of flows by forwarding every child into one merged
/// channel. Children run concurrently as soon as the outer flow produces
/// them; the merged channel closes when the outer flow and all children have
/// finished.
pub(crate) struct FlattenStage<T: Send> {
    pub(crate) upstream: Flow<Flow<T>>,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for FlattenStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let scope = Scope::unsupervised();
        let capacity = ctx.capacity.get();
        let (merged_tx, merged_rx) = channel::<T>(capacity);
        let mut outer_rx = channelize(&scope, ctx, self.upstream.clone(), capacity);

        let manager_tx = merged_tx.clone();
        scope.fork(async move {
            let mut children: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
            let mut outer_open = true;
            loop {
                if !outer_open && children.is_empty() {
                    manager_tx.done();
                    break;
                }
                tokio::select! {
                    child = outer_rx.recv(), if outer_open => match child {
                        Ok(child_flow) => {
                            let tx = manager_tx.clone();
                            children.push(
                                async move {
                                    let mut emit = ChannelEmit::new(tx.clone());
                                    match child_flow.run(ctx, &mut emit).await {
                                        Ok(()) | Err(Stop::Enough) => {}
                                        Err(Stop::Error(e)) => tx.error(e),
                                    }
                                }
                                .boxed(),
                            );
                        }
                        Err(Closed::Done) => outer_open = false,
                        Err(Closed::Error(e)) => {
                            manager_tx.error(e);
                            break;
                        }
                    },
                    _ = children.next(), if !children.is_empty() => {}
                }
            }
            Ok(())
        });

        let result = drain_into(merged_rx, emit).await;
        scope.shutdown().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use crate::error::FlowError;
    use crate::flow::Flow;

    #[tokio::test]
    async fn flatten_emits_every_child_element() {
        let out = Flow::from_iter(1..=3)
            .map(|x| Flow::from_iter(vec![x * 10, x * 10 + 1]))
            .flatten()
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(
            out.into_iter().collect::<HashSet<_>>(),
            HashSet::from([10, 11, 20, 21, 30, 31])
        );
    }

    #[tokio::test]
    async fn flatten_runs_children_concurrently() {
        // The slow first child must not block the second child's elements.
        let slow = Flow::from_iter([1, 2]).throttle(1, Duration::from_millis(40));
        let fast = Flow::from_iter([100, 200]);
        let out = Flow::from_iter([slow, fast])
            .flatten()
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 4);
        // The fast child's elements arrive before the slow child finishes.
        let pos_200 = out.iter().position(|x| *x == 200).unwrap();
        let pos_2 = out.iter().position(|x| *x == 2).unwrap();
        assert!(pos_200 < pos_2);
    }

    #[tokio::test]
    async fn flatten_of_an_empty_outer_flow_is_empty() {
        let out = Flow::<Flow<i32>>::empty().flatten().run_collect().await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn flatten_with_empty_children_emits_nothing() {
        let out = Flow::from_iter([0, 1])
            .map(|_| Flow::<i32>::empty())
            .flatten()
            .run_collect()
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn flatten_fails_when_a_child_fails() {
        let out = Flow::from_iter([
            Flow::from_iter([1, 2]).throttle(1, Duration::from_millis(10)),
            Flow::failed(FlowError::message("child failed")),
        ])
        .flatten()
        .run_collect()
        .await;
        assert_eq!(out.unwrap_err().to_string(), "child failed");
    }
}
