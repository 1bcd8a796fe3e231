//! Downstream consumers of completed batches.

use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;

/// Future returned by a sink for one delivered batch.
pub type SinkFuture = BoxFuture<'static, Result<()>>;

/// Receives completed batches from a [`BatchAggregator`](super::BatchAggregator).
///
/// `deliver` is called synchronously while the batch is handed over, so it
/// should only build the future. The returned future is driven on a detached
/// task; its error is logged by the aggregator and never reaches `add`.
/// Batches reach `deliver` in flush order and outside the buffer lock, so a
/// sink may add records to the aggregator that feeds it.
pub trait BatchSink<T>: Send + Sync + 'static {
    /// Hand over one batch. Ownership of the records moves to the sink.
    fn deliver(&self, batch: Vec<T>) -> SinkFuture;
}

impl<T, F, Fut> BatchSink<T> for F
where
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn deliver(&self, batch: Vec<T>) -> SinkFuture {
        Box::pin(self(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_closure_is_a_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink = move |batch: Vec<u32>| {
            captured.lock().unwrap().extend(batch);
            async { anyhow::Ok(()) }
        };

        let fut = sink.deliver(vec![1, 2, 3]);
        // The synchronous half already ran.
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        tokio_test::assert_ok!(fut.await);
    }

    #[tokio::test]
    async fn test_sink_error_is_returned_from_future() {
        let sink = |_batch: Vec<u32>| async { Err::<(), _>(anyhow::anyhow!("bulk write rejected")) };
        let err = sink.deliver(vec![7]).await.unwrap_err();
        assert!(err.to_string().contains("bulk write rejected"));
    }
}
