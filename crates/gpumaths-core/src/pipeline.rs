//! Double-buffered dispatch over two streams.
//!
//! Chunk `i` is encoded and enqueued on one stream while chunk `i - 1`
//! finishes on the other; then the streams swap roles. A chunk's outputs are
//! decoded only after its own `get_results`, at its absolute indices, so
//! batch order is preserved even though the two streams run concurrently.

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::device::Launch;
use crate::dispatch::{Dispatcher, KernelBatch};
use crate::error::Result;
use crate::stream::{StreamGuard, StreamPool};

struct InFlight {
    stream: usize,
    launch: Launch,
    start: usize,
}

impl Dispatcher {
    /// Like [`Dispatcher::run_chunk`], overlapping consecutive chunks on two
    /// streams taken together.
    ///
    /// Falls back to the single-stream path when the pool has one stream or
    /// the batch fits in one chunk.
    pub fn run_pipelined<B>(&self, pool: &StreamPool, batch: &mut B) -> Result<()>
    where
        B: KernelBatch + ?Sized,
    {
        let n = batch.len();
        let kind = batch.kind();
        let max = self.max_slots(pool, kind);
        if pool.num_streams() < 2 || max == 0 || n <= max {
            return self.run_chunk(pool, batch);
        }

        let mut streams = pool.take_streams(2)?;
        let layout = self.layout_for(kind, pool.capacity_bytes())?;
        let codec = self.codec(pool.device().wire_order());

        debug!(
            kernel = %kind,
            slots = n,
            max_slots = max,
            chunks = n.div_ceil(max),
            "Dispatching pipelined batch"
        );

        let mut pending: Option<InFlight> = None;
        for (chunk, start) in (0..n).step_by(max).enumerate() {
            let end = (start + max).min(n);
            let current = chunk % 2;

            let submitted = self
                .encode(&codec, &mut streams[current], &layout, batch, start..end)
                .and_then(|launch| {
                    streams[current].enqueue(&launch)?;
                    Ok(launch)
                });
            let launch = match submitted {
                Ok(launch) => launch,
                Err(e) => {
                    self.drain(&codec, &mut streams, pending.take(), batch);
                    return Err(e);
                }
            };

            if let Some(prev) = pending.take() {
                if let Err(e) = self.finish(&codec, &mut streams, &prev, batch) {
                    // the chunk just enqueued must complete before its stream goes back
                    let _ = streams[current].get_results();
                    return Err(e);
                }
            }
            pending = Some(InFlight {
                stream: current,
                launch,
                start,
            });
        }

        match pending {
            Some(last) => self.finish(&codec, &mut streams, &last, batch),
            None => Ok(()),
        }
    }

    fn finish<B>(
        &self,
        codec: &Codec,
        streams: &mut [StreamGuard<'_>],
        chunk: &InFlight,
        batch: &mut B,
    ) -> Result<()>
    where
        B: KernelBatch + ?Sized,
    {
        let stream = &mut streams[chunk.stream];
        stream.get_results()?;
        self.decode(codec, stream, &chunk.launch, batch, chunk.start);
        Ok(())
    }

    fn drain<B>(
        &self,
        codec: &Codec,
        streams: &mut [StreamGuard<'_>],
        pending: Option<InFlight>,
        batch: &mut B,
    ) where
        B: KernelBatch + ?Sized,
    {
        if let Some(chunk) = pending {
            if let Err(e) = self.finish(codec, streams, &chunk, batch) {
                warn!(error = %e, start = chunk.start, "In-flight chunk failed while aborting batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::dispatch::tests::EchoBatch;
    use crate::dispatch::Dispatcher;
    use crate::sizes::{BnWidth, OperationKind};
    use crate::stream::{PoolConfig, StreamPool};
    use crate::testing::EchoDevice;

    fn setup(num_streams: usize) -> (Arc<EchoDevice>, Dispatcher, StreamPool) {
        let dispatcher = Dispatcher::for_width(BnWidth::Bits2048);
        let config = PoolConfig::containing(num_streams, 3, OperationKind::Mul2, dispatcher.sizes());
        let device = Arc::new(EchoDevice::new());
        let pool = StreamPool::new(device.clone(), config).unwrap();
        (device, dispatcher, pool)
    }

    #[test]
    fn test_pipelined_matches_sequential() {
        let (device, dispatcher, pool) = setup(2);
        let mut batch = EchoBatch::new(11);
        dispatcher.run_pipelined(&pool, &mut batch).unwrap();
        assert_eq!(device.enqueued(), 4);
        assert_eq!(batch.stores, 11);
        for i in 0..11 {
            assert_eq!(batch.out[i].as_ref(), Some(&batch.b[i]), "slot {i}");
        }
        let stats = pool.stats();
        assert_eq!(stats.per_stream_launches, vec![2, 2]);
        assert_eq!(stats.peak_checked_out, 2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_pipelined_single_stream_fallback() {
        let (device, dispatcher, pool) = setup(1);
        let mut batch = EchoBatch::new(7);
        dispatcher.run_pipelined(&pool, &mut batch).unwrap();
        assert_eq!(device.enqueued(), 3);
        assert!(batch.out.iter().all(Option::is_some));
    }

    #[test]
    fn test_pipelined_error_keeps_finished_chunks() {
        let (device, dispatcher, pool) = setup(2);
        device.fail_enqueue_at(2);
        let mut batch = EchoBatch::new(12);
        assert!(dispatcher.run_pipelined(&pool, &mut batch).is_err());
        // chunks 0 and 1 finished, 2 failed to launch, 3 never submitted
        assert!(batch.out[..6].iter().all(Option::is_some));
        assert!(batch.out[6..].iter().all(Option::is_none));
        assert_eq!(pool.available(), 2);
    }
}
