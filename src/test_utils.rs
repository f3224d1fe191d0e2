use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::FlowError;

/// Tracks how many instrumented calls run at the same time, and the highest
/// count ever observed. Used to check the concurrency bounds of the parallel
/// operators.
#[derive(Clone)]
pub struct ConcurrencyProbe(Arc<Counters>);

struct Counters {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyProbe {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Arc::new(Counters {
            current: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
        }))
    }

    /// An instrumented mapping future: holds a concurrency slot for
    /// `millis`, then resolves to `value`.
    pub fn run<U: Send + 'static>(
        &self,
        millis: u64,
        value: U,
    ) -> BoxFuture<'static, Result<U, FlowError>> {
        let counters = Arc::clone(&self.0);
        async move {
            let now = counters.current.fetch_add(1, Ordering::SeqCst) + 1;
            counters.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            counters.current.fetch_sub(1, Ordering::SeqCst);
            Ok(value)
        }
        .boxed()
    }

    pub fn max(&self) -> usize {
        self.0.max.load(Ordering::SeqCst)
    }
}
