use async_trait::async_trait;

use crate::emit::{Emit, EmitResult, Stop};
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct TakeStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) n: usize,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for TakeStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = TakeEmit {
            downstream: emit,
            remaining: self.n,
            tripped: false,
        };
        match self.upstream.run(ctx, &mut wrapper).await {
            // The stop we raised ourselves is clean completion. A stop raised
            // by a downstream operator keeps propagating.
            Err(Stop::Enough) if wrapper.tripped => Ok(()),
            other => other,
        }
    }
}

struct TakeEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<T>,
    remaining: usize,
    tripped: bool,
}

#[async_trait]
impl<'a, T: Send> Emit<T> for TakeEmit<'a, T> {
    async fn emit(&mut self, value: T) -> EmitResult {
        if self.remaining == 0 {
            self.tripped = true;
            return Err(Stop::Enough);
        }
        self.remaining -= 1;
        self.downstream.emit(value).await?;
        if self.remaining == 0 {
            // Unwind right after the last wanted element instead of waiting
            // for the upstream to produce one more.
            self.tripped = true;
            return Err(Stop::Enough);
        }
        Ok(())
    }
}

pub(crate) struct TakeWhileStage<T: Send, P> {
    pub(crate) upstream: Flow<T>,
    pub(crate) predicate: P,
    pub(crate) include_first_failing: bool,
}

#[async_trait]
impl<T, P> Stage<T> for TakeWhileStage<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync,
{
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = TakeWhileEmit {
            downstream: emit,
            predicate: &self.predicate,
            include_first_failing: self.include_first_failing,
            tripped: false,
        };
        match self.upstream.run(ctx, &mut wrapper).await {
            Err(Stop::Enough) if wrapper.tripped => Ok(()),
            other => other,
        }
    }
}

struct TakeWhileEmit<'a, T: Send, P> {
    downstream: &'a mut dyn Emit<T>,
    predicate: &'a P,
    include_first_failing: bool,
    tripped: bool,
}

#[async_trait]
impl<'a, T, P> Emit<T> for TakeWhileEmit<'a, T, P>
where
    T: Send,
    P: Fn(&T) -> bool + Send + Sync,
{
    async fn emit(&mut self, value: T) -> EmitResult {
        if (self.predicate)(&value) {
            self.downstream.emit(value).await
        } else {
            if self.include_first_failing {
                self.downstream.emit(value).await?;
            }
            self.tripped = true;
            Err(Stop::Enough)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::flow::Flow;

    #[tokio::test]
    async fn take_emits_the_first_n() {
        let out = Flow::from_iter([1, 2, 3]).take(2).run_collect().await.unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn take_more_than_available_emits_everything() {
        let out = Flow::from_iter([1, 2]).take(5).run_collect().await.unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn take_zero_emits_nothing() {
        let out = Flow::from_iter([1, 2]).take(0).run_collect().await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn take_stops_the_upstream_early() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let produced = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&produced);
        let out = Flow::from_iter(1..=1000)
            .tap(move |_| {
                probe.fetch_add(1, Ordering::SeqCst);
            })
            .take(3)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        // The abort unwinds right after the third element.
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn nested_takes_stop_at_the_smaller_bound() {
        let out = Flow::from_iter(1..=10)
            .take(7)
            .take(2)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn take_while_stops_at_the_first_failing_element() {
        let out = Flow::from_iter([1, 2, 5, 1, 2])
            .take_while(|x| *x < 3, false)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn take_while_can_include_the_first_failing_element() {
        let out = Flow::from_iter([1, 2, 5, 1, 2])
            .take_while(|x| *x < 3, true)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 5]);
    }

    #[tokio::test]
    async fn take_while_passing_everything_completes_normally() {
        let out = Flow::from_iter([1, 2])
            .take_while(|x| *x < 10, false)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }
}
