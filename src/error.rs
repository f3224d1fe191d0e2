use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// The single failure a flow can end with.
///
/// Errors cross task boundaries and may be observed by several channel
/// receivers at once, so the payload is reference-counted and the whole
/// enum is `Clone`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum FlowError {
    /// A user-supplied callback or an upstream producer failed.
    #[error("{0}")]
    Failed(Arc<dyn Error + Send + Sync + 'static>),
    /// A task driving part of the pipeline panicked.
    #[error("flow task panicked: {0}")]
    Panicked(String),
    /// A companion sink was closed while the flow still had elements for it.
    #[error("companion sink closed")]
    SinkClosed,
    /// The task was cancelled by its scope. Cancellation is the shutdown
    /// mechanism, not a flow failure; this value only surfaces when joining
    /// a fork that was cancelled out from under the caller.
    #[error("cancelled")]
    Cancelled,
}

impl FlowError {
    /// Wraps an arbitrary error as the flow's failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        FlowError::Failed(Arc::new(error))
    }

    /// A failure described by a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        FlowError::Failed(Arc::new(MessageError(message.into())))
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for MessageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_errors_display_their_payload() {
        let e = FlowError::message("boom");
        assert_eq!(e.to_string(), "boom");
    }

    #[test]
    fn wrapped_errors_are_clonable() {
        let e = FlowError::failed(std::io::Error::other("disk gone"));
        let e2 = e.clone();
        assert_eq!(e.to_string(), e2.to_string());
    }
}
