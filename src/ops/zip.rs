use async_trait::async_trait;

use crate::channel::Closed;
use crate::emit::{Emit, EmitResult, Stop};
use crate::flow::{Flow, RunCtx, Stage};
use crate::ops::channelize;
use crate::scope::Scope;

pub(crate) struct ZipStage<T: Send, U: Send> {
    pub(crate) left: Flow<T>,
    pub(crate) right: Flow<U>,
}

#[async_trait]
impl<T, U> Stage<(T, U)> for ZipStage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<(T, U)>) -> EmitResult {
        let scope = Scope::unsupervised();
        let capacity = ctx.capacity.get();
        let mut left_rx = channelize(&scope, ctx, self.left.clone(), capacity);
        let mut right_rx = channelize(&scope, ctx, self.right.clone(), capacity);

        let result = loop {
            let left = match left_rx.recv().await {
                Ok(value) => value,
                Err(Closed::Done) => break Ok(()),
                Err(Closed::Error(e)) => break Err(Stop::Error(e)),
            };
            match right_rx.recv().await {
                Ok(right) => {
                    if let Err(stop) = emit.emit((left, right)).await {
                        break Err(stop);
                    }
                }
                // The unmatched left element is discarded.
                Err(Closed::Done) => break Ok(()),
                Err(Closed::Error(e)) => break Err(Stop::Error(e)),
            }
        };
        scope.shutdown().await;
        result
    }
}

pub(crate) struct ZipAllStage<T: Send, U: Send> {
    pub(crate) left: Flow<T>,
    pub(crate) right: Flow<U>,
    pub(crate) left_default: T,
    pub(crate) right_default: U,
}

#[async_trait]
impl<T, U> Stage<(T, U)> for ZipAllStage<T, U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<(T, U)>) -> EmitResult {
        let scope = Scope::unsupervised();
        let capacity = ctx.capacity.get();
        let mut left_rx = channelize(&scope, ctx, self.left.clone(), capacity);
        let mut right_rx = channelize(&scope, ctx, self.right.clone(), capacity);

        let mut left_open = true;
        let mut right_open = true;
        let result = loop {
            let left = if left_open {
                match left_rx.recv().await {
                    Ok(value) => Some(value),
                    Err(Closed::Done) => {
                        left_open = false;
                        None
                    }
                    Err(Closed::Error(e)) => break Err(Stop::Error(e)),
                }
            } else {
                None
            };
            let right = if right_open {
                match right_rx.recv().await {
                    Ok(value) => Some(value),
                    Err(Closed::Done) => {
                        right_open = false;
                        None
                    }
                    Err(Closed::Error(e)) => break Err(Stop::Error(e)),
                }
            } else {
                None
            };
            let pair = match (left, right) {
                (Some(l), Some(r)) => (l, r),
                (Some(l), None) => (l, self.right_default.clone()),
                (None, Some(r)) => (self.left_default.clone(), r),
                (None, None) => break Ok(()),
            };
            if let Err(stop) = emit.emit(pair).await {
                break Err(stop);
            }
        };
        scope.shutdown().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::error::FlowError;
    use crate::flow::Flow;

    #[tokio::test]
    async fn zip_pairs_positionally_and_stops_at_the_shorter_side() {
        let out = Flow::from_iter([1, 2, 3])
            .zip(Flow::from_iter(["a", "b"]))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![(1, "a"), (2, "b")]);
    }

    #[tokio::test]
    async fn zip_with_an_empty_side_emits_nothing() {
        let out = Flow::from_iter([1, 2, 3])
            .zip(Flow::<i32>::empty())
            .run_collect()
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn zip_all_substitutes_defaults_for_the_finished_side() {
        let out = Flow::from_iter([1, 2])
            .zip_all(Flow::from_iter([10, 20, 30]), 0, 0)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![(1, 10), (2, 20), (0, 30)]);
    }

    #[tokio::test]
    async fn zip_all_with_a_longer_left_side() {
        let out = Flow::from_iter([1, 2, 3])
            .zip_all(Flow::from_iter(["a"]), 0, "-")
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![(1, "a"), (2, "-"), (3, "-")]);
    }

    #[tokio::test]
    async fn zip_all_of_two_empties_emits_nothing() {
        let out = Flow::<i32>::empty()
            .zip_all(Flow::<i32>::empty(), 0, 0)
            .run_collect()
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn zip_fails_when_a_side_fails() {
        let result = Flow::from_iter([1, 2, 3])
            .zip(Flow::<i32>::failed(FlowError::message("zip side died")))
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "zip side died");
    }
}
