//! Bounded FIFO mailbox with explicit terminal states.
//!
//! Unlike a plain mpsc channel, a flow channel distinguishes *how* it ended:
//! `done()` lets receivers drain the buffer and then observe [`Closed::Done`],
//! while `error(e)` supersedes anything still buffered so the failure is
//! visible immediately. Both `send` and `recv` are cancel-safe, which is what
//! lets operators compose them with `tokio::select!`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

use crate::error::FlowError;

/// Terminal state of a channel.
#[derive(Clone, Debug)]
pub enum Closed {
    /// The sender finished cleanly; the buffer has been drained.
    Done,
    /// The producing side failed.
    Error(FlowError),
}

impl Closed {
    /// Returns the error if this is the errored terminal state.
    pub fn into_error(self) -> Option<FlowError> {
        match self {
            Closed::Done => None,
            Closed::Error(e) => Some(e),
        }
    }
}

/// Outcome of a non-blocking send attempt.
#[derive(Debug)]
pub enum TrySendError {
    /// The buffer is at capacity right now.
    Full,
    /// The channel has reached a terminal state or lost its receiver.
    Closed(Closed),
}

struct State<T> {
    buffer: VecDeque<T>,
    terminal: Option<Closed>,
    receiver_alive: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    senders: AtomicUsize,
    /// Notified when the buffer gains an element or a terminal state is set.
    readable: Notify,
    /// Notified when buffer space frees up, a terminal state is set, or the
    /// receiver goes away.
    writable: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // The critical sections below never run user code, so a poisoned
        // lock can only mean an allocation failure mid-push; carry on.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_terminal(&self, terminal: Closed) {
        {
            let mut state = self.lock();
            if state.terminal.is_some() {
                return;
            }
            trace!(?terminal, "channel closed");
            if matches!(terminal, Closed::Error(_)) {
                // Errors supersede buffered values.
                state.buffer.clear();
            }
            state.terminal = Some(terminal);
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

/// Creates a bounded channel. `capacity` must be positive.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "channel capacity must be positive");
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: VecDeque::with_capacity(capacity),
            terminal: None,
            receiver_alive: true,
        }),
        capacity,
        senders: AtomicUsize::new(1),
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Sends one value, suspending while the buffer is full.
    ///
    /// Returns the channel's terminal state instead if it closed, without
    /// having enqueued the value. Cancel-safe: a dropped send leaves the
    /// channel untouched.
    pub async fn send(&self, value: T) -> Result<(), Closed> {
        loop {
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.lock();
                if let Some(terminal) = &state.terminal {
                    return Err(terminal.clone());
                }
                if !state.receiver_alive {
                    return Err(Closed::Done);
                }
                if state.buffer.len() < self.shared.capacity {
                    state.buffer.push_back(value);
                    drop(state);
                    self.shared.readable.notify_waiters();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Attempts to send without suspending.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError> {
        let mut state = self.shared.lock();
        if let Some(terminal) = &state.terminal {
            return Err(TrySendError::Closed(terminal.clone()));
        }
        if !state.receiver_alive {
            return Err(TrySendError::Closed(Closed::Done));
        }
        if state.buffer.len() >= self.shared.capacity {
            return Err(TrySendError::Full);
        }
        state.buffer.push_back(value);
        drop(state);
        self.shared.readable.notify_waiters();
        Ok(())
    }

    /// Marks the channel cleanly finished. Receivers drain the buffer, then
    /// observe [`Closed::Done`]. A no-op once any terminal state is set.
    pub fn done(&self) {
        self.shared.set_terminal(Closed::Done);
    }

    /// Fails the channel. Buffered values are discarded so receivers observe
    /// the error immediately. A no-op once any terminal state is set.
    pub fn error(&self, error: FlowError) {
        self.shared.set_terminal(Closed::Error(error));
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Sender {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last sender gone without an explicit terminal: close cleanly so
            // receivers are never left waiting.
            self.shared.set_terminal(Closed::Done);
        }
    }
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Receives the next value, suspending while the buffer is empty.
    ///
    /// Once the channel is errored the error is returned even if values were
    /// still buffered. Cancel-safe: a dropped recv consumes nothing.
    pub async fn recv(&mut self) -> Result<T, Closed> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.lock();
                if let Some(Closed::Error(e)) = &state.terminal {
                    return Err(Closed::Error(e.clone()));
                }
                if let Some(value) = state.buffer.pop_front() {
                    drop(state);
                    self.shared.writable.notify_waiters();
                    return Ok(value);
                }
                if state.terminal.is_some() {
                    return Err(Closed::Done);
                }
            }
            notified.await;
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.receiver_alive = false;
        drop(state);
        self.shared.writable.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fifo_within_a_channel() {
        let (tx, mut rx) = channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tx.send(3).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn done_lets_receivers_drain_first() {
        let (tx, mut rx) = channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tx.done();

        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
        assert!(matches!(rx.recv().await, Err(Closed::Done)));
        // Terminal is permanent.
        assert!(matches!(rx.recv().await, Err(Closed::Done)));
    }

    #[tokio::test]
    async fn error_supersedes_buffered_values() {
        let (tx, mut rx) = channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tx.error(FlowError::message("boom"));

        match rx.recv().await {
            Err(Closed::Error(e)) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_terminal_state_wins() {
        let (tx, mut rx) = channel(2);
        tx.send(7).await.unwrap();
        tx.done();
        tx.error(FlowError::message("late"));

        assert_eq!(rx.recv().await.unwrap(), 7);
        assert!(matches!(rx.recv().await, Err(Closed::Done)));
    }

    #[tokio::test]
    async fn send_after_terminal_reports_the_terminal() {
        let (tx, _rx) = channel(2);
        tx.error(FlowError::message("dead"));
        assert!(matches!(tx.send(1).await, Err(Closed::Error(_))));
    }

    #[tokio::test]
    async fn send_blocks_until_capacity_frees_up() {
        let (tx, mut rx) = channel(1);
        tx.send(1).await.unwrap();

        let blocked = tokio::spawn(async move {
            tx.send(2).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap(), 1);
        blocked.await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn try_send_reports_full_and_closed() {
        let (tx, rx) = channel(1);
        assert!(tx.try_send(1).is_ok());
        assert!(matches!(tx.try_send(2), Err(TrySendError::Full)));

        drop(rx);
        assert!(matches!(
            tx.try_send(3),
            Err(TrySendError::Closed(Closed::Done))
        ));
    }

    #[tokio::test]
    async fn dropping_all_senders_closes_cleanly() {
        let (tx, mut rx) = channel(2);
        let tx2 = tx.clone();
        tx.send(1).await.unwrap();
        drop(tx);
        drop(tx2);

        assert_eq!(rx.recv().await.unwrap(), 1);
        assert!(matches!(rx.recv().await, Err(Closed::Done)));
    }

    #[tokio::test]
    async fn dropping_the_receiver_unblocks_senders() {
        let (tx, rx) = channel(1);
        tx.send(1).await.unwrap();

        let blocked = tokio::spawn(async move { tx.send(2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(rx);

        assert!(matches!(blocked.await.unwrap(), Err(Closed::Done)));
    }

    #[tokio::test]
    async fn recv_is_cancel_safe_inside_select() {
        let (tx, mut rx) = channel(2);
        let mut received = Vec::new();

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tx.done();

        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Ok(v) => received.push(v),
                    Err(Closed::Done) => break,
                    Err(Closed::Error(e)) => panic!("unexpected error: {e}"),
                },
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
        }

        assert_eq!(received, vec![1, 2]);
    }
}
