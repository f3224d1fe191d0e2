use async_trait::async_trait;

use crate::emit::{Emit, EmitResult};
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct SkipStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) n: usize,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for SkipStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = SkipEmit {
            downstream: emit,
            remaining: self.n,
        };
        self.upstream.run(ctx, &mut wrapper).await
    }
}

struct SkipEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<T>,
    remaining: usize,
}

#[async_trait]
impl<'a, T: Send> Emit<T> for SkipEmit<'a, T> {
    async fn emit(&mut self, value: T) -> EmitResult {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(());
        }
        self.downstream.emit(value).await
    }
}

#[cfg(test)]
mod tests {
    use crate::flow::Flow;

    #[tokio::test]
    async fn skip_drops_the_first_n() {
        let out = Flow::from_iter([1, 2, 3, 4]).skip(2).run_collect().await.unwrap();
        assert_eq!(out, vec![3, 4]);
    }

    #[tokio::test]
    async fn skip_more_than_available_emits_nothing() {
        let out = Flow::from_iter([1, 2]).skip(5).run_collect().await.unwrap();
        assert!(out.is_empty());
    }
}
