//! Bounded pool of streams shared by concurrent callers.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::Stream;
use crate::device::Device;
use crate::error::{GpumathsError, Result};

struct PoolState {
    available: Vec<Stream>,
    checked_out: usize,
    peak_checked_out: usize,
}

/// Fixed set of identical-capacity streams.
///
/// Every stream is either available, checked out through a [`StreamGuard`],
/// or being destroyed. Taking a stream is the only place a caller blocks.
pub struct StreamPool {
    device: Arc<dyn Device>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    returned: Condvar,
    stream_launches: Vec<Arc<AtomicU64>>,
    total_takes: AtomicU64,
    created_at: Instant,
}

impl StreamPool {
    /// Create `config.num_streams` streams on `device`.
    ///
    /// All or nothing: if any stream fails, every stream already created is
    /// destroyed and a configuration error is returned.
    pub fn new(device: Arc<dyn Device>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut streams = Vec::with_capacity(config.num_streams);
        let mut stream_launches = Vec::with_capacity(config.num_streams);
        for id in 0..config.num_streams {
            match device.create_stream(config.capacity_bytes) {
                Ok(inner) => {
                    debug!(stream = id, capacity = config.capacity_bytes, "Created stream");
                    let launches = Arc::new(AtomicU64::new(0));
                    stream_launches.push(Arc::clone(&launches));
                    streams.push(Stream::new(id, inner, launches));
                }
                Err(e) => {
                    warn!(
                        device = device.name(),
                        stream = id,
                        error = %e,
                        "Stream creation failed, tearing down partial pool"
                    );
                    destroy_all(streams);
                    return Err(e.into_configuration());
                }
            }
        }

        // Streams are popped from the back; keep stream 0 first out.
        streams.reverse();

        info!(
            device = device.name(),
            num_streams = config.num_streams,
            capacity = config.capacity_bytes,
            "Created stream pool"
        );

        Ok(Self {
            device,
            config,
            state: Mutex::new(PoolState {
                available: streams,
                checked_out: 0,
                peak_checked_out: 0,
            }),
            returned: Condvar::new(),
            stream_launches,
            total_takes: AtomicU64::new(0),
            created_at: Instant::now(),
        })
    }

    /// Device the streams run on.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of streams in the pool.
    pub fn num_streams(&self) -> usize {
        self.config.num_streams
    }

    /// Host buffer size of every stream.
    pub fn capacity_bytes(&self) -> usize {
        self.config.capacity_bytes
    }

    /// Streams currently available.
    pub fn available(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Block until a stream is free and check it out.
    pub fn take_stream(&self) -> StreamGuard<'_> {
        let mut state = self.state.lock();
        while state.available.is_empty() {
            self.returned.wait(&mut state);
        }
        let stream = self.checkout(&mut state);
        StreamGuard::new(self, stream)
    }

    /// Check out a stream if one is free right now.
    pub fn try_take_stream(&self) -> Option<StreamGuard<'_>> {
        let mut state = self.state.lock();
        if state.available.is_empty() {
            return None;
        }
        let stream = self.checkout(&mut state);
        Some(StreamGuard::new(self, stream))
    }

    /// Wait at most `timeout` for a stream.
    ///
    /// A timeout too large to form a deadline (such as `Duration::MAX`)
    /// waits like [`StreamPool::take_stream`].
    pub fn take_stream_timeout(&self, timeout: Duration) -> Option<StreamGuard<'_>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.take_stream());
        };
        let mut state = self.state.lock();
        while state.available.is_empty() {
            if self.returned.wait_until(&mut state, deadline).timed_out()
                && state.available.is_empty()
            {
                return None;
            }
        }
        let stream = self.checkout(&mut state);
        Some(StreamGuard::new(self, stream))
    }

    /// Block until `n` streams are free and check them all out at once.
    ///
    /// Taking them together means two callers that each need two streams
    /// cannot deadlock holding one apiece.
    pub fn take_streams(&self, n: usize) -> Result<Vec<StreamGuard<'_>>> {
        if n > self.config.num_streams {
            return Err(GpumathsError::Configuration(format!(
                "Cannot take {} streams from a pool of {}",
                n, self.config.num_streams
            )));
        }
        let mut state = self.state.lock();
        while state.available.len() < n {
            self.returned.wait(&mut state);
        }
        let streams: Vec<Stream> = (0..n).map(|_| self.checkout(&mut state)).collect();
        drop(state);
        Ok(streams
            .into_iter()
            .map(|stream| StreamGuard::new(self, stream))
            .collect())
    }

    fn checkout(&self, state: &mut PoolState) -> Stream {
        // callers hold the lock and have checked availability
        let stream = match state.available.pop() {
            Some(stream) => stream,
            None => unreachable!("checkout from an empty pool"),
        };
        state.checked_out += 1;
        state.peak_checked_out = state.peak_checked_out.max(state.checked_out);
        self.total_takes.fetch_add(1, Ordering::Relaxed);
        stream
    }

    fn return_stream(&self, stream: Stream) {
        let mut state = self.state.lock();
        state.available.push(stream);
        state.checked_out -= 1;
        drop(state);
        // take_streams waiters need more than one, so wake everyone
        self.returned.notify_all();
    }

    /// Utilization statistics.
    pub fn stats(&self) -> StreamPoolStats {
        let (checked_out, peak_checked_out) = {
            let state = self.state.lock();
            (state.checked_out, state.peak_checked_out)
        };
        let per_stream_launches: Vec<u64> = self
            .stream_launches
            .iter()
            .map(|l| l.load(Ordering::Relaxed))
            .collect();
        let total_launches = per_stream_launches.iter().sum();
        let elapsed_secs = self.created_at.elapsed().as_secs_f64();

        StreamPoolStats {
            total_takes: self.total_takes.load(Ordering::Relaxed),
            total_launches,
            per_stream_launches,
            checked_out,
            peak_checked_out,
            launches_per_second: if elapsed_secs > 0.0 {
                total_launches as f64 / elapsed_secs
            } else {
                0.0
            },
        }
    }

    /// Release every stream's device context and host buffer.
    ///
    /// Consuming the pool means no guard can still be alive. Every stream is
    /// destroyed even if one fails; the first failure is returned.
    pub fn destroy(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let streams = std::mem::take(&mut self.state.get_mut().available);
        if streams.is_empty() {
            return Ok(());
        }
        info!(
            device = self.device.name(),
            num_streams = streams.len(),
            "Destroying stream pool"
        );
        match destroy_all(streams) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for StreamPool {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "Stream pool teardown failed");
        }
    }
}

impl fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPool")
            .field("device", &self.device.name())
            .field("config", &self.config)
            .field("available", &self.available())
            .finish()
    }
}

/// Destroys every stream, returning the first error.
fn destroy_all(streams: Vec<Stream>) -> Option<GpumathsError> {
    let mut first = None;
    for stream in streams {
        let id = stream.id();
        if let Err(e) = stream.destroy() {
            warn!(stream = id, error = %e, "Failed to destroy stream");
            first.get_or_insert(e);
        }
    }
    first
}

/// A checked-out stream. Returned to its pool on drop.
pub struct StreamGuard<'a> {
    pool: &'a StreamPool,
    stream: Option<Stream>,
}

impl<'a> StreamGuard<'a> {
    fn new(pool: &'a StreamPool, stream: Stream) -> Self {
        Self {
            pool,
            stream: Some(stream),
        }
    }

    /// Pool this stream belongs to.
    pub fn pool(&self) -> &'a StreamPool {
        self.pool
    }
}

impl Deref for StreamGuard<'_> {
    type Target = Stream;

    fn deref(&self) -> &Stream {
        match &self.stream {
            Some(stream) => stream,
            None => unreachable!("stream guard used after release"),
        }
    }
}

impl DerefMut for StreamGuard<'_> {
    fn deref_mut(&mut self) -> &mut Stream {
        match &mut self.stream {
            Some(stream) => stream,
            None => unreachable!("stream guard used after release"),
        }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.return_stream(stream);
        }
    }
}

impl fmt::Debug for StreamGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamGuard").field(&self.stream).finish()
    }
}

/// Statistics for stream pool utilization.
#[derive(Debug, Clone)]
pub struct StreamPoolStats {
    /// Streams checked out since the pool was created.
    pub total_takes: u64,
    /// Kernel launches across all streams.
    pub total_launches: u64,
    /// Kernel launches per stream.
    pub per_stream_launches: Vec<u64>,
    /// Streams checked out right now.
    pub checked_out: usize,
    /// Most streams ever checked out at the same time.
    pub peak_checked_out: usize,
    /// Average launches per second.
    pub launches_per_second: f64,
}

impl StreamPoolStats {
    /// Returns the most utilized stream index.
    #[must_use]
    pub fn most_utilized_stream(&self) -> Option<usize> {
        self.per_stream_launches
            .iter()
            .enumerate()
            .max_by_key(|(_, &count)| count)
            .map(|(idx, _)| idx)
    }

    /// Utilization balance (0.0 = all on one stream, 1.0 = perfectly balanced).
    #[must_use]
    pub fn balance_ratio(&self) -> f64 {
        let n = self.per_stream_launches.len();
        if n < 2 || self.total_launches == 0 {
            return 1.0;
        }

        let mean = self.total_launches as f64 / n as f64;
        let variance = self
            .per_stream_launches
            .iter()
            .map(|&count| (count as f64 - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let worst = mean.powi(2) * (n as f64 - 1.0);

        1.0 - (variance / worst).sqrt()
    }
}

impl fmt::Display for StreamPoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StreamPool: {} takes, {} launches ({:.1}/s), peak {} checked out, {:.1}% balanced",
            self.total_takes,
            self.total_launches,
            self.launches_per_second,
            self.peak_checked_out,
            self.balance_ratio() * 100.0
        )
    }
}
