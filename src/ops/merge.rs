use async_trait::async_trait;

use crate::channel::Closed;
use crate::emit::{Emit, EmitResult, Stop};
use crate::flow::{Flow, RunCtx, Stage};
use crate::ops::{channelize, drain_into};
use crate::scope::Scope;

pub(crate) struct MergeStage<T: Send> {
    pub(crate) left: Flow<T>,
    pub(crate) right: Flow<T>,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for MergeStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let scope = Scope::unsupervised();
        let capacity = ctx.capacity.get();
        let mut left_rx = channelize(&scope, ctx, self.left.clone(), capacity);
        let mut right_rx = channelize(&scope, ctx, self.right.clone(), capacity);

        // tokio::select! polls branches in random order, so neither side can
        // starve the other.
        let result = loop {
            tokio::select! {
                item = left_rx.recv() => match item {
                    Ok(value) => {
                        if let Err(stop) = emit.emit(value).await {
                            break Err(stop);
                        }
                    }
                    Err(Closed::Done) => break drain_into(right_rx, emit).await,
                    Err(Closed::Error(e)) => break Err(Stop::Error(e)),
                },
                item = right_rx.recv() => match item {
                    Ok(value) => {
                        if let Err(stop) = emit.emit(value).await {
                            break Err(stop);
                        }
                    }
                    Err(Closed::Done) => break drain_into(left_rx, emit).await,
                    Err(Closed::Error(e)) => break Err(Stop::Error(e)),
                },
            }
        };
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
    async fn merge_emits_the_union_of_both_sides() {
        let out = Flow::from_iter([1, 2, 3])
            .merge(Flow::from_iter([10, 20]))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(
            out.iter().copied().collect::<HashSet<_>>(),
            HashSet::from([1, 2, 3, 10, 20])
        );
    }

    #[tokio::test]
    async fn merge_preserves_relative_order_within_each_side() {
        let out = Flow::from_iter([1, 2, 3])
            .merge(Flow::from_iter([10, 20, 30]))
            .run_collect()
            .await
            .unwrap();
        let left: Vec<i32> = out.iter().copied().filter(|x| *x < 10).collect();
        let right: Vec<i32> = out.iter().copied().filter(|x| *x >= 10).collect();
        assert_eq!(left, vec![1, 2, 3]);
        assert_eq!(right, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn merge_drains_the_slower_side_after_one_completes() {
        let slow = Flow::from_iter([100, 200]).throttle(1, Duration::from_millis(20));
        let out = Flow::from_iter([1]).merge(slow).run_collect().await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.contains(&100) && out.contains(&200));
    }

    #[tokio::test]
    async fn merge_fails_when_either_side_fails() {
        let result = Flow::from_iter([1, 2, 3])
            .throttle(1, Duration::from_millis(10))
            .merge(Flow::failed(FlowError::message("right side broke")))
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "right side broke");
    }
}
