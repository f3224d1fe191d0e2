use async_trait::async_trait;

use crate::emit::{Emit, EmitResult};
use crate::flow::{Flow, RunCtx, Stage};
use crate::ops::{channelize, drain_into};
use crate::scope::Scope;

pub(crate) struct BufferedStage<T: Send> {
    pub(crate) upstream: Flow<T>,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for BufferedStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        let scope = Scope::unsupervised();
        let rx = channelize(&scope, ctx, self.upstream.clone(), ctx.capacity.get());
        let result = drain_into(rx, emit).await;
        scope.shutdown().await;
        result
    }
}
