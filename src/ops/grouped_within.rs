use std::mem;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::FutureExt;

use crate::channel::Closed;
use crate::emit::{Emit, EmitResult, Stop};
use crate::error::FlowError;
use crate::flow::{Flow, RunCtx, Stage};
use crate::ops::channelize;
use crate::scope::Scope;

/// Time-bounded weighted grouping. The flush timer has three modes:
/// armed (a running sleep), fired with a non-empty buffer (flush and
/// re-arm), and fired while the buffer was empty (suspended until the next
/// element, which flushes immediately). The third mode is what keeps empty
/// windows from ever being emitted.
pub(crate) struct GroupedWeightedWithinStage<T: Send, F> {
    pub(crate) upstream: Flow<T>,
    pub(crate) min_weight: u64,
    pub(crate) duration: Duration,
    pub(crate) cost: F,
}

#[async_trait]
impl<T, F> Stage<Vec<T>> for GroupedWeightedWithinStage<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> Result<u64, FlowError> + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<Vec<T>>) -> EmitResult {
        let scope = Scope::unsupervised();
        let mut rx = channelize(&scope, ctx, self.upstream.clone(), ctx.capacity.get());

        let mut buffer: Vec<T> = Vec::new();
        let mut accumulated: u64 = 0;
        let mut armed = true;
        let mut expiry: BoxFuture<'static, ()> = tokio::time::sleep(self.duration).boxed();

        let result = loop {
            tokio::select! {
                biased;

                _ = &mut expiry, if armed => {
                    if buffer.is_empty() {
                        // Suspend: no new timer until an element arrives.
                        armed = false;
                        expiry = future::pending().boxed();
                    } else {
                        accumulated = 0;
                        let group = mem::take(&mut buffer);
                        if let Err(stop) = emit.emit(group).await {
                            break Err(stop);
                        }
                        expiry = tokio::time::sleep(self.duration).boxed();
                    }
                }

                item = rx.recv() => match item {
                    Ok(value) => {
                        match (self.cost)(&value) {
                            Ok(cost) => accumulated += cost,
                            Err(e) => break Err(Stop::Error(e)),
                        }
                        buffer.push(value);
                        if !armed || accumulated >= self.min_weight {
                            accumulated = 0;
                            let group = mem::take(&mut buffer);
                            if let Err(stop) = emit.emit(group).await {
                                break Err(stop);
                            }
                            armed = true;
                            expiry = tokio::time::sleep(self.duration).boxed();
                        }
                    }
                    Err(Closed::Done) => {
                        if !buffer.is_empty() {
                            let group = mem::take(&mut buffer);
                            if let Err(stop) = emit.emit(group).await {
                                break Err(stop);
                            }
                        }
                        break Ok(());
                    }
                    Err(Closed::Error(e)) => break Err(Stop::Error(e)),
                }
            }
        };
        scope.shutdown().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::channel::channel;
    use crate::error::FlowError;
    use crate::flow::Flow;

    #[tokio::test]
    async fn grouped_within_flushes_full_groups_immediately() {
        let out = Flow::from_iter(1..=6)
            .grouped_within(2, Duration::from_secs(10))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1, 2], vec![3, 4], vec![5, 6]]);
    }

    #[tokio::test]
    async fn grouped_within_flushes_a_partial_group_on_timeout() {
        let (tx, rx) = channel(16);
        let collect = tokio::spawn(async move {
            Flow::from_channel(rx)
                .grouped_within(10, Duration::from_millis(50))
                .run_collect()
                .await
        });

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        // Wait out the window, then send more and finish.
        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(3).await.unwrap();
        tx.done();

        let out = collect.await.unwrap().unwrap();
        assert_eq!(out, vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test]
    async fn grouped_within_emits_no_empty_windows() {
        let (tx, rx) = channel(16);
        let collect = tokio::spawn(async move {
            Flow::from_channel(rx)
                .grouped_within(10, Duration::from_millis(20))
                .run_collect()
                .await
        });

        // Several windows elapse with nothing to flush.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(1).await.unwrap();
        tx.done();

        let out = collect.await.unwrap().unwrap();
        assert_eq!(out, vec![vec![1]]);
    }

    #[tokio::test]
    async fn grouped_within_concatenation_equals_the_input() {
        let input: Vec<i32> = (1..=17).collect();
        let out = Flow::from_iter(input.clone())
            .grouped_within(4, Duration::from_millis(50))
            .run_collect()
            .await
            .unwrap();
        assert!(out.iter().all(|w| !w.is_empty()));
        let rebuilt: Vec<i32> = out.into_iter().flatten().collect();
        assert_eq!(rebuilt, input);
    }

    #[tokio::test]
    async fn grouped_weighted_within_flushes_on_weight() {
        let out = Flow::from_iter([4u64, 5, 2, 3, 3, 5])
            .grouped_weighted_within(10, Duration::from_secs(10), |x| Ok(*x))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![vec![4, 5, 2], vec![3, 3, 5]]);
    }

    #[tokio::test]
    async fn grouped_weighted_within_cost_failure_fails_the_flow() {
        let result = Flow::from_iter([1, 2, 3])
            .grouped_weighted_within(10, Duration::from_secs(1), |x| {
                if *x == 2 {
                    Err(FlowError::message("cost exploded"))
                } else {
                    Ok(1)
                }
            })
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "cost exploded");
    }

    #[tokio::test]
    async fn grouped_within_upstream_failure_propagates() {
        let result = Flow::from_iter([1, 2])
            .concat(Flow::failed(FlowError::message("source died")))
            .grouped_within(10, Duration::from_secs(1))
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "source died");
    }
}
