//! Decode-ahead playback: a background decoder feeding a lock-free ring buffer.
//!
//! The producer thread owns the [`PacketPipeline`] and does all file reads and decoding. The
//! audio callback owns a [`PlayoutConsumer`] and only copies already-decoded samples out of the
//! ring, so its cost per invocation is a bounded copy. If the producer falls behind, the callback
//! plays silence and counts an underrun instead of blocking.

use std::io::{Read, Seek};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info};

use crate::codec::Codec;
use crate::pipeline::PacketPipeline;
use crate::scheduler::{OutputSample, StreamStatus};
use crate::{Error, Result};

const PRODUCER_RUNNING: u8 = 0;
const PRODUCER_FINISHED: u8 = 1;
const PRODUCER_FAILED: u8 = 2;
const PRODUCER_STOPPED: u8 = 3;

// How long the producer waits for the callback to drain a full ring.
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(2);

struct Shared {
    producer: AtomicU8,
    stop: AtomicBool,
    underruns: AtomicU64,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            producer: AtomicU8::new(PRODUCER_RUNNING),
            stop: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        }
    }
}

/// Real-time side of decode-ahead playback. Move this into the audio callback.
pub struct PlayoutConsumer {
    cons: HeapCons<i16>,
    shared: Arc<Shared>,
    channels: usize,
    done: Option<StreamStatus>,
}

/// Control side of the producer thread.
///
/// Dropping the handle stops the thread and waits for it.
pub struct ProducerHandle {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<Result<()>>>,
}

/// Move `pipeline` onto a new decoder thread that fills a ring of `capacity_samples`
/// interleaved samples.
///
/// The capacity is raised to at least one full packet so the producer can always make progress.
pub fn spawn<R, C>(
    pipeline: PacketPipeline<R, C>,
    capacity_samples: usize,
) -> Result<(PlayoutConsumer, ProducerHandle)>
where
    R: Read + Seek + Send + 'static,
    C: Codec + Send + 'static,
{
    let channels = pipeline.channels() as usize;
    let packet_samples = (pipeline.frames_per_packet() as usize) * channels;
    let capacity = capacity_samples.max(packet_samples).max(channels);

    let (prod, cons) = HeapRb::<i16>::new(capacity).split();
    let shared = Arc::new(Shared::default());

    let producer_shared = Arc::clone(&shared);
    let handle = thread::Builder::new()
        .name("alac-decode-ahead".into())
        .spawn(move || produce(pipeline, prod, &producer_shared))?;

    debug!(capacity, channels, "decode-ahead started");

    Ok((
        PlayoutConsumer {
            cons,
            shared: Arc::clone(&shared),
            channels,
            done: None,
        },
        ProducerHandle {
            shared,
            handle: Some(handle),
        },
    ))
}

fn produce<R, C>(mut pipeline: PacketPipeline<R, C>, mut prod: HeapProd<i16>, shared: &Shared) -> Result<()>
where
    R: Read + Seek,
    C: Codec,
{
    while !shared.stop.load(Ordering::Acquire) {
        match pipeline.next_packet() {
            Ok(Some(pcm)) => {
                if !push_all(&mut prod, pcm, shared) {
                    break;
                }
            }
            Ok(None) => {
                shared.producer.store(PRODUCER_FINISHED, Ordering::Release);
                info!(frames = pipeline.cursor().frame_index, "decoded every frame");
                pipeline.close();
                return Ok(());
            }
            Err(err) => {
                shared.producer.store(PRODUCER_FAILED, Ordering::Release);
                error!(
                    error = %err,
                    frame = pipeline.cursor().frame_index,
                    "decode-ahead aborted"
                );
                pipeline.close();
                return Err(err);
            }
        }
    }

    // Nothing more will be pushed; the consumer plays out what is buffered and completes.
    shared.producer.store(PRODUCER_STOPPED, Ordering::Release);
    debug!(frame = pipeline.cursor().frame_index, "decode-ahead stopped");
    pipeline.close();
    Ok(())
}

/// Push every sample, waiting for space as needed. Returns `false` if asked to stop first.
fn push_all(prod: &mut HeapProd<i16>, mut pcm: &[i16], shared: &Shared) -> bool {
    while !pcm.is_empty() {
        if shared.stop.load(Ordering::Acquire) {
            return false;
        }
        let pushed = prod.push_slice(pcm);
        pcm = &pcm[pushed..];
        if pushed == 0 {
            thread::sleep(BACKPRESSURE_WAIT);
        }
    }
    true
}

impl PlayoutConsumer {
    /// Service one audio-engine invocation by copying whole frames out of the ring.
    ///
    /// Anything not filled from the ring is silence. Reports `Complete` once the producer has
    /// finished or been stopped and the ring holds no whole frame, and `Abort` as soon as the
    /// producer has failed.
    pub fn render<S: OutputSample>(&mut self, out: &mut [S]) -> StreamStatus {
        if let Some(status) = self.done {
            out.fill(S::SILENCE);
            return status;
        }

        // Load the producer state before looking at the ring, so that a terminal state seen here
        // covers every sample it pushed.
        let producer = self.shared.producer.load(Ordering::Acquire);
        if producer == PRODUCER_FAILED {
            out.fill(S::SILENCE);
            self.done = Some(StreamStatus::Abort);
            return StreamStatus::Abort;
        }

        let wanted = out.len() - out.len() % self.channels;
        let available = self.cons.occupied_len();
        let available = available - available % self.channels;
        let n = wanted.min(available);

        let mut filled = 0;
        while filled < n {
            match self.cons.try_pop() {
                Some(sample) => out[filled] = S::from_pcm16(sample),
                None => break,
            }
            filled += 1;
        }
        out[filled..].fill(S::SILENCE);

        // A stop can leave a partial frame behind, which is never played.
        let ended = matches!(producer, PRODUCER_FINISHED | PRODUCER_STOPPED);
        let drained = self.cons.occupied_len() < self.channels;
        if ended && drained {
            if filled == 0 {
                info!(
                    underruns = self.underruns(),
                    stopped = producer == PRODUCER_STOPPED,
                    "playout complete"
                );
                self.done = Some(StreamStatus::Complete);
                return StreamStatus::Complete;
            }
        } else if filled < wanted {
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        }

        StreamStatus::Continue
    }

    /// Number of invocations that could not be filled from the ring.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Interleaved samples currently buffered.
    pub fn buffered_samples(&self) -> usize {
        self.cons.occupied_len()
    }
}

impl ProducerHandle {
    /// Ask the producer to stop and wait for it.
    pub fn stop(&mut self) -> Result<()> {
        self.shared.stop.store(true, Ordering::Release);
        self.join()
    }

    /// Wait for the producer to exit on its own, returning its error if it failed.
    pub fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(res) => res,
                Err(_) => {
                    self.shared.producer.store(PRODUCER_FAILED, Ordering::Release);
                    Err(Error::msg("decode-ahead thread panicked"))
                }
            },
            None => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(capacity: usize, channels: usize) -> (PlayoutConsumer, HeapProd<i16>, Arc<Shared>) {
        let (prod, cons) = HeapRb::<i16>::new(capacity).split();
        let shared = Arc::new(Shared::default());
        let consumer = PlayoutConsumer {
            cons,
            shared: Arc::clone(&shared),
            channels,
            done: None,
        };
        (consumer, prod, shared)
    }

    #[test]
    fn copies_buffered_frames_then_reports_underrun() {
        let (mut consumer, mut prod, _) = consumer(16, 2);
        prod.push_slice(&[1, 2, 3, 4]);

        let mut out = [9i16; 6];
        assert_eq!(consumer.render(&mut out), StreamStatus::Continue);
        assert_eq!(out, [1, 2, 3, 4, 0, 0]);
        assert_eq!(consumer.underruns(), 1);
    }

    #[test]
    fn never_splits_a_frame_across_invocations() {
        let (mut consumer, mut prod, _) = consumer(16, 2);
        prod.push_slice(&[1, 2, 3]);

        let mut out = [9i16; 4];
        consumer.render(&mut out);
        assert_eq!(out, [1, 2, 0, 0]);
        assert_eq!(consumer.buffered_samples(), 1);
    }

    #[test]
    fn completes_only_after_draining() {
        let (mut consumer, mut prod, shared) = consumer(16, 1);
        prod.push_slice(&[5, 6]);
        shared.producer.store(PRODUCER_FINISHED, Ordering::Release);

        let mut out = [0i16; 4];
        assert_eq!(consumer.render(&mut out), StreamStatus::Continue);
        assert_eq!(out, [5, 6, 0, 0]);
        assert_eq!(consumer.render(&mut out), StreamStatus::Complete);
        assert_eq!(consumer.render(&mut out), StreamStatus::Complete);
        assert_eq!(consumer.underruns(), 0);
    }

    #[test]
    fn aborts_as_soon_as_producer_fails() {
        let (mut consumer, mut prod, shared) = consumer(16, 1);
        prod.push_slice(&[5, 6]);
        shared.producer.store(PRODUCER_FAILED, Ordering::Release);

        let mut out = [1.0f32; 2];
        assert_eq!(consumer.render(&mut out), StreamStatus::Abort);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(consumer.render(&mut out), StreamStatus::Abort);
    }

    #[test]
    fn stopped_producer_completes_once_drained() {
        let (mut consumer, mut prod, shared) = consumer(16, 2);
        // The stop landed mid-frame.
        prod.push_slice(&[1, 2, 3]);
        shared.producer.store(PRODUCER_STOPPED, Ordering::Release);

        let mut out = [9i16; 4];
        assert_eq!(consumer.render(&mut out), StreamStatus::Continue);
        assert_eq!(out, [1, 2, 0, 0]);
        assert_eq!(consumer.render(&mut out), StreamStatus::Complete);
        assert_eq!(out, [0, 0, 0, 0]);
        assert_eq!(consumer.underruns(), 0);
    }

    #[test]
    fn buffer_smaller_than_a_frame_still_completes() {
        let (mut consumer, mut prod, shared) = consumer(16, 2);
        prod.push_slice(&[1, 2]);
        shared.producer.store(PRODUCER_FINISHED, Ordering::Release);

        let mut tiny = [9i16; 1];
        assert_eq!(consumer.render(&mut tiny), StreamStatus::Continue);
        assert_eq!(tiny, [0]);

        let mut out = [0i16; 2];
        assert_eq!(consumer.render(&mut out), StreamStatus::Continue);
        assert_eq!(out, [1, 2]);
        assert_eq!(consumer.render(&mut tiny), StreamStatus::Complete);
        assert_eq!(consumer.underruns(), 0);
    }
}
