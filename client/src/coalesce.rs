//! Request coalescing.
//!
//! Loads issued against one [`Coalescer`] before any of them yields are
//! merged into a single loader call over the deduplicated keys. The first
//! caller to resume after yielding takes the pending batch and runs it; the
//! others wait for their values on oneshot channels. A load issued after the
//! batch was taken starts a fresh batch.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

type Waiter<K, V> = (K, oneshot::Sender<Result<V>>);

struct PendingBatch<K, V> {
    /// Unique keys, in first-seen order.
    keys: Vec<K>,
    waiters: Vec<Waiter<K, V>>,
}

/// A coalescing scope. Create one per logical read (a `bulk_get` call, a
/// join) so that unrelated reads never share a batch.
pub struct Coalescer<K, V> {
    pending: Mutex<Option<PendingBatch<K, V>>>,
}

impl<K, V> Default for Coalescer<K, V> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }
}

impl<K, V> Coalescer<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingBatch<K, V>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enqueue(&self, keys: Vec<K>) -> Vec<oneshot::Receiver<Result<V>>> {
        let mut pending = self.lock();
        let batch = pending.get_or_insert_with(|| PendingBatch {
            keys: Vec::new(),
            waiters: Vec::new(),
        });

        keys.into_iter()
            .map(|key| {
                if !batch.keys.contains(&key) {
                    batch.keys.push(key.clone());
                }
                let (tx, rx) = oneshot::channel();
                batch.waiters.push((key, tx));
                rx
            })
            .collect()
    }

    fn take(&self) -> Option<PendingBatch<K, V>> {
        self.lock().take()
    }

    /// Load one key.
    pub async fn load<F, Fut>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<Vec<V>>>,
    {
        let mut values = self.load_many(vec![key], loader).await?;
        values.pop().ok_or(Error::Dropped)
    }

    /// Load `keys`, returning one value per key in the given order.
    ///
    /// `loader` receives unique keys and must return one value per key, in
    /// the same order. It only runs if this call ends up leading the batch.
    pub async fn load_many<F, Fut>(&self, keys: Vec<K>, loader: F) -> Result<Vec<V>>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<Vec<V>>>,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let receivers = self.enqueue(keys);

        // Let every other load of this scheduling window join the batch.
        tokio::task::yield_now().await;

        let batch = self.take();
        if let Some(batch) = batch {
            dispatch(batch, loader).await;
        }

        let mut values = Vec::with_capacity(receivers.len());
        for rx in receivers {
            values.push(rx.await.map_err(|_| Error::Dropped)??);
        }
        Ok(values)
    }
}

async fn dispatch<K, V, F, Fut>(batch: PendingBatch<K, V>, loader: F)
where
    K: Clone + Eq + Hash,
    V: Clone,
    F: FnOnce(Vec<K>) -> Fut,
    Fut: Future<Output = Result<Vec<V>>>,
{
    let PendingBatch { keys, waiters } = batch;
    tracing::debug!(
        keys = keys.len(),
        waiters = waiters.len(),
        "Dispatching coalesced batch"
    );

    let expected = keys.len();
    match loader(keys.clone()).await {
        Ok(values) if values.len() == expected => {
            let by_key: HashMap<K, V> = keys.into_iter().zip(values).collect();
            for (key, tx) in waiters {
                let _ = tx.send(by_key.get(&key).cloned().ok_or(Error::Dropped));
            }
        }
        Ok(values) => {
            let err = Error::Decode(format!(
                "loader returned {} values for {} keys",
                values.len(),
                expected
            ));
            for (_, tx) in waiters {
                let _ = tx.send(Err(err.clone()));
            }
        }
        Err(err) => {
            for (_, tx) in waiters {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }
}
