use std::time::Duration;

use async_trait::async_trait;

use crate::emit::{Emit, EmitResult};
use crate::flow::{Flow, RunCtx, Stage};

pub(crate) struct ThrottleStage<T: Send> {
    pub(crate) upstream: Flow<T>,
    pub(crate) interval: Duration,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for ThrottleStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let mut wrapper = ThrottleEmit {
            downstream: emit,
            interval: self.interval,
        };
        self.upstream.run(ctx, &mut wrapper).await
    }
}

struct ThrottleEmit<'a, T: Send> {
    downstream: &'a mut dyn Emit<T>,
    interval: Duration,
}

#[async_trait]
impl<'a, T: Send> Emit<T> for ThrottleEmit<'a, T> {
    async fn emit(&mut self, value: T) -> EmitResult {
        // Sleeping before the emit keeps the downstream emission time inside
        // the measured interval.
        tokio::time::sleep(self.interval).await;
        self.downstream.emit(value).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::flow::Flow;

    #[tokio::test]
    async fn throttle_spaces_out_emissions() {
        let started = Instant::now();
        let out = Flow::from_iter([1, 2, 3, 4])
            .throttle(2, Duration::from_millis(100))
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
        // 4 elements at 2 per 100ms is 50ms apiece.
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    #[should_panic(expected = "throttle elements must be positive")]
    async fn throttle_rejects_zero_elements() {
        let _ = Flow::from_iter([1]).throttle(0, Duration::from_millis(100));
    }

    #[tokio::test]
    #[should_panic(expected = "throttle period must be at least 1ms")]
    async fn throttle_rejects_a_sub_millisecond_period() {
        let _ = Flow::from_iter([1]).throttle(1, Duration::from_micros(10));
    }
}
