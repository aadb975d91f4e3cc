//! Fan-out of one source stream to many subscribers.
//!
//! The first subscriber starts the source through a connect function; every
//! item the source yields is offered to each subscriber's bounded queue.
//! A subscriber whose queue is full is dropped rather than allowed to stall
//! the source. When the source ends, every subscriber stream ends and the
//! broadcaster returns to idle, so the next subscriber connects afresh.

use crate::core::error::StoreResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

struct Subscriber<T> {
    tx: mpsc::Sender<T>,
    /// Ends the task that unsubscribes on caller cancellation.
    done: CancellationToken,
}

struct State<T> {
    running: bool,
    next_id: u64,
    subs: HashMap<u64, Subscriber<T>>,
}

impl<T> State<T> {
    fn unsubscribe(&mut self, id: u64) {
        if let Some(sub) = self.subs.remove(&id) {
            sub.done.cancel();
        }
    }
}

/// Broadcasts items from a lazily started source.
pub struct Broadcaster<T> {
    state: Arc<Mutex<State<T>>>,
    buffer: usize,
}

impl<T> std::fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create an idle broadcaster with `buffer` slots per subscriber.
    pub fn new(buffer: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                running: false,
                next_id: 0,
                subs: HashMap::new(),
            })),
            buffer: buffer.max(1),
        }
    }

    /// Subscribe, starting the source with `connect` if it is not running.
    ///
    /// The subscription ends when `cancel` fires, when the subscriber falls
    /// behind, or when the source ends.
    pub async fn subscribe<F, Fut>(
        &self,
        cancel: &CancellationToken,
        connect: F,
    ) -> StoreResult<mpsc::Receiver<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<mpsc::Receiver<T>>>,
    {
        let mut state = self.state.lock().await;
        if !state.running {
            let source = connect().await?;
            state.running = true;
            tokio::spawn(stream(self.state.clone(), source));
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        let id = state.next_id;
        state.next_id += 1;
        let done = cancel.child_token();
        state.subs.insert(
            id,
            Subscriber {
                tx,
                done: done.clone(),
            },
        );
        drop(state);

        let shared = self.state.clone();
        tokio::spawn(async move {
            done.cancelled().await;
            shared.lock().await.unsubscribe(id);
        });
        Ok(rx)
    }

    /// Whether the source is currently running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subs.len()
    }
}

async fn publish<T: Clone>(state: &Mutex<State<T>>, item: T) {
    let mut state = state.lock().await;
    let mut dropped = Vec::new();
    for (id, sub) in &state.subs {
        match sub.tx.try_send(item.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscriber = id, "dropping slow watch subscriber");
                dropped.push(*id);
            }
            Err(TrySendError::Closed(_)) => dropped.push(*id),
        }
    }
    for id in dropped {
        state.unsubscribe(id);
    }
}

async fn stream<T: Clone>(state: Arc<Mutex<State<T>>>, mut source: mpsc::Receiver<T>) {
    while let Some(item) = source.recv().await {
        publish(&state, item).await;
    }

    let mut state = state.lock().await;
    let ids: Vec<u64> = state.subs.keys().copied().collect();
    for id in ids {
        state.unsubscribe(id);
    }
    state.running = false;
    tracing::debug!("broadcast source ended");
}
