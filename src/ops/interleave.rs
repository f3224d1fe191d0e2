use async_trait::async_trait;

use crate::channel::{Closed, Receiver};
use crate::emit::{Emit, EmitResult, Stop};
use crate::flow::{Flow, RunCtx, Stage};
use crate::ops::channelize;
use crate::scope::Scope;

pub(crate) struct InterleaveStage<T: Send> {
    pub(crate) flows: Vec<Flow<T>>,
    pub(crate) segment_size: usize,
    pub(crate) eager_complete: bool,
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for InterleaveStage<T> {
    async fn run(&self, ctx: RunCtx, emit: &mut dyn Emit<T>) -> EmitResult {
        if self.flows.is_empty() {
            return Ok(());
        }
        let scope = Scope::unsupervised();
        let capacity = ctx.capacity.get();
        let mut receivers: Vec<Option<Receiver<T>>> = self
            .flows
            .iter()
            .map(|flow| Some(channelize(&scope, ctx, flow.clone(), capacity)))
            .collect();
        let mut open = receivers.len();
        let mut index = 0;

        let result = 'run: loop {
            if open == 0 {
                break Ok(());
            }
            let mut finished = false;
            if let Some(rx) = receivers[index].as_mut() {
                let mut taken = 0;
                while taken < self.segment_size {
                    match rx.recv().await {
                        Ok(value) => {
                            taken += 1;
                            if let Err(stop) = emit.emit(value).await {
                                break 'run Err(stop);
                            }
                        }
                        Err(Closed::Done) => {
                            finished = true;
                            break;
                        }
                        Err(Closed::Error(e)) => break 'run Err(Stop::Error(e)),
                    }
                }
            }
            if finished {
                receivers[index] = None;
                open -= 1;
                if self.eager_complete {
                    break Ok(());
                }
            }
            index = (index + 1) % receivers.len();
        };
        scope.shutdown().await;
        result
    }
}
