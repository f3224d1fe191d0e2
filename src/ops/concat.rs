use async_trait::async_trait;

use crate::emit::{Emit, EmitResult};
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct ConcatAllStage<T: Send> {
    pub(crate) flows: Vec<Flow<T>>,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for ConcatAllStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        for flow in &self.flows {
            flow.run(ctx, emit).await?;
        }
        Ok(())
    }
}

pub(crate) struct OrElseStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) alternative: Flow<T>,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for OrElseStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = CountingEmit {
            downstream: emit,
            emitted: false,
        };
        self.upstream.run(ctx, &mut wrapper).await?;
        if wrapper.emitted {
            Ok(())
        } else {
            self.alternative.run(ctx, wrapper.downstream).await
        }
    }
}

struct CountingEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<T>,
    emitted: bool,
}

#[async_trait]
impl<'a, T: Send> Emit<T> for CountingEmit<'a, T> {
    async fn emit(&mut self, value: T) -> EmitResult {
        self.emitted = true;
        self.downstream.emit(value).await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::FlowError;
    use crate::flow::Flow;

    #[tokio::test]
    async fn concat_runs_flows_in_sequence() {
        let out = Flow::from_iter([1, 2])
            .concat(Flow::from_iter([3, 4]))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn prepend_runs_the_other_flow_first() {
        let out = Flow::from_iter([3, 4])
            .prepend(Flow::from_iter([1, 2]))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn concat_with_empty_is_identity_on_both_sides() {
        let left = Flow::from_iter([1, 2, 3])
            .concat(Flow::empty())
            .run_collect()
            .await
            .unwrap();
        let right = Flow::empty()
            .concat(Flow::from_iter([1, 2, 3]))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(left, vec![1, 2, 3]);
        assert_eq!(right, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn a_failing_flow_stops_the_concatenation() {
        let result = Flow::from_iter([1])
            .concat(Flow::failed(FlowError::message("mid")))
            .concat(Flow::from_iter([2]))
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "mid");
    }

    #[tokio::test]
    async fn or_else_runs_the_alternative_only_when_empty() {
        let from_empty = Flow::empty()
            .or_else(Flow::from_iter([7, 8]))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(from_empty, vec![7, 8]);

        let from_nonempty = Flow::from_iter([1])
            .or_else(Flow::from_iter([7, 8]))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(from_nonempty, vec![1]);
    }

    #[tokio::test]
    async fn or_else_does_not_recover_failures() {
        let result = Flow::failed(FlowError::message("broken"))
            .or_else(Flow::from_iter([7, 8]))
            .run_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "broken");
    }
}
