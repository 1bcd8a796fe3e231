//! Size/time bounded batch aggregator.
//!
//! Records are buffered per stream and released to a [`BatchSink`] either when
//! the buffer reaches `max_size` or `max_time` after the first record of the
//! current window, whichever comes first.

use super::sink::{BatchSink, SinkFuture};
use super::BatchError;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Thresholds for one aggregator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Upper bound on records per batch.
    pub max_size: usize,
    /// Upper bound on how long a record waits before being flushed.
    pub max_time: Duration,
}

impl BatchConfig {
    pub fn new(max_size: usize, max_time: Duration) -> Self {
        Self { max_size, max_time }
    }

    /// Reject thresholds that could never trigger a flush.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.max_size == 0 {
            return Err(BatchError::InvalidConfig(
                "max_size must be at least 1".to_string(),
            ));
        }
        if self.max_time.is_zero() {
            return Err(BatchError::InvalidConfig(
                "max_time must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

const MAX_PREALLOCATED: usize = 1024;

fn initial_capacity(config: &BatchConfig) -> usize {
    config.max_size.min(MAX_PREALLOCATED)
}

/// What caused a flush. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Timer,
    Explicit,
}

struct State<T> {
    buffer: Vec<T>,
    /// Incremented on every non-empty flush; a timer only flushes the window it was armed for.
    window: u64,
    timer: Option<JoinHandle<()>>,
    /// Flushed batches waiting for `deliver`, oldest first.
    ready: VecDeque<Vec<T>>,
    /// Set while one caller is handing `ready` batches to the sink.
    dispatching: bool,
    in_flight: JoinSet<()>,
}

impl<T> State<T> {
    /// Become the dispatcher if batches are waiting and nobody else is.
    fn claim_dispatch(&mut self) -> bool {
        if self.dispatching || self.ready.is_empty() {
            return false;
        }
        self.dispatching = true;
        true
    }
}

struct Shared<T> {
    name: String,
    config: BatchConfig,
    sink: Box<dyn BatchSink<T>>,
    runtime: Handle,
    state: Mutex<State<T>>,
}

/// Buffers records and hands them to a sink in bounded batches.
///
/// Cloning yields another handle to the same buffer. Dropping the last
/// handle aborts sink tasks that are still running; call
/// [`shutdown`](Self::shutdown) first.
pub struct BatchAggregator<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BatchAggregator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> BatchAggregator<T> {
    /// Create an aggregator bound to the current tokio runtime.
    pub fn new(
        name: impl Into<String>,
        config: BatchConfig,
        sink: impl BatchSink<T>,
    ) -> Result<Self, BatchError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| BatchError::NoRuntime)?;

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                sink: Box::new(sink),
                runtime,
                state: Mutex::new(State {
                    buffer: Vec::with_capacity(initial_capacity(&config)),
                    window: 0,
                    timer: None,
                    ready: VecDeque::new(),
                    dispatching: false,
                    in_flight: JoinSet::new(),
                }),
            }),
        })
    }

    /// Stream name used in log output.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> BatchConfig {
        self.shared.config
    }

    /// Append a record. Flushes before returning when the buffer is full,
    /// otherwise arms the window timer if none is pending.
    pub fn add(&self, record: T) {
        let dispatch = {
            let mut state = self.shared.lock();
            state.buffer.push(record);

            if state.buffer.len() >= self.shared.config.max_size {
                self.shared.flush_locked(&mut state, FlushReason::Size);
                state.claim_dispatch()
            } else {
                if state.timer.is_none() {
                    let window = state.window;
                    let timer = self.shared.arm_timer(Arc::downgrade(&self.shared), window);
                    state.timer = Some(timer);
                }
                false
            }
        };

        if dispatch {
            self.shared.dispatch();
        }
    }

    /// Flush whatever is buffered. Returns the number of records handed to
    /// the sink; zero (and no sink call) when the buffer is empty.
    pub fn flush(&self) -> usize {
        self.shared.flush(FlushReason::Explicit)
    }

    /// Final flush, then wait for every sink task still running.
    pub async fn shutdown(&self) {
        self.flush();

        loop {
            let mut in_flight = {
                let mut state = self.shared.lock();
                if state.in_flight.is_empty() && !state.dispatching {
                    break;
                }
                std::mem::take(&mut state.in_flight)
            };

            // Another handle is still handing batches over.
            if in_flight.is_empty() {
                tokio::task::yield_now().await;
                continue;
            }

            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!(stream = %self.shared.name, "batch sink task aborted: {}", e);
                }
            }
        }
        debug!(stream = %self.shared.name, "aggregator drained");
    }

    /// Number of records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Whether a window timer is currently armed.
    #[cfg(test)]
    pub fn has_pending_timer(&self) -> bool {
        self.shared.lock().timer.is_some()
    }
}

impl<T: Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Every mutation is a single push, pop or swap, so a poisoned guard still holds a consistent buffer.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_timer(&self, shared: Weak<Self>, window: u64) -> JoinHandle<()> {
        // Deadline is fixed when the window opens, not when the task is first polled.
        let deadline = Instant::now() + self.config.max_time;
        self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                shared.on_timer(window);
            }
        })
    }

    fn on_timer(&self, window: u64) {
        let dispatch = {
            let mut state = self.lock();
            if state.window != window {
                // Lost the race against a size or explicit flush.
                return;
            }
            // Dropping the handle detaches it; this task is the one finishing.
            state.timer = None;
            self.flush_locked(&mut state, FlushReason::Timer);
            state.claim_dispatch()
        };

        if dispatch {
            self.dispatch();
        }
    }

    fn flush(&self, reason: FlushReason) -> usize {
        let (flushed, dispatch) = {
            let mut state = self.lock();
            let flushed = self.flush_locked(&mut state, reason);
            (flushed, state.claim_dispatch())
        };

        if dispatch {
            self.dispatch();
        }
        flushed
    }

    /// Close the current window and queue its batch for the sink.
    fn flush_locked(&self, state: &mut State<T>, reason: FlushReason) -> usize {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.buffer.is_empty() {
            return 0;
        }

        let batch = std::mem::replace(
            &mut state.buffer,
            Vec::with_capacity(initial_capacity(&self.config)),
        );
        state.window = state.window.wrapping_add(1);
        let len = batch.len();

        debug!(stream = %self.name, ?reason, records = len, "flushing batch");
        state.ready.push_back(batch);
        len
    }

    /// Hand queued batches to the sink in flush order, outside the buffer
    /// lock. Only the caller that claimed dispatch runs this; batches queued
    /// meanwhile, including by the sink itself, are picked up by the loop.
    fn dispatch(&self) {
        loop {
            let batch = {
                let mut state = self.lock();
                match state.ready.pop_front() {
                    Some(batch) => batch,
                    None => {
                        state.dispatching = false;
                        return;
                    }
                }
            };

            let delivered = panic::catch_unwind(AssertUnwindSafe(|| self.sink.deliver(batch)));
            let future: SinkFuture = match delivered {
                Ok(future) => future,
                Err(_) => {
                    error!(stream = %self.name, "batch sink panicked while accepting a batch");
                    continue;
                }
            };

            let mut state = self.lock();
            // Reap finished sink tasks so the set only tracks live ones.
            while state.in_flight.try_join_next().is_some() {}

            let name = self.name.clone();
            state.in_flight.spawn_on(
                async move {
                    if let Err(e) = future.await {
                        warn!(stream = %name, "batch sink failed: {:#}", e);
                    }
                },
                &self.runtime,
            );
        }
    }
}
