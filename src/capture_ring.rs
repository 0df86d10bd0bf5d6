/// Capture ring module for moving samples out of the audio callback
///
/// Implements a single-producer/single-consumer ring between the real-time
/// device callback (writer) and the thread pulling frames (reader).
/// Holds 60 seconds of 16kHz PCM audio by default, so capture keeps
/// running while the reader is blocked in a slow reaction.

use crate::frame::{AudioSample, SAMPLE_RATE};
use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error};

/// Ring buffer size: 60 seconds at 16kHz sample rate
///
/// Must exceed `reaction::MAX_REACTION_TIME`, the longest the reader can be
/// away from the ring.
pub const RING_DURATION_SECS: usize = 60;
pub const RING_CAPACITY: usize = RING_DURATION_SECS * SAMPLE_RATE as usize; // 960,000 samples

/// Condition that makes the ring unusable for further reads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingFault {
    #[error("capture overrun: reader fell behind and {0} samples were lost")]
    Overrun(usize),

    #[error("audio device error: {0}")]
    Device(String),
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Flags shared by both halves
struct RingStatus {
    overrun: CachePadded<AtomicBool>,
    dropped: CachePadded<AtomicUsize>,
    device_fault: Mutex<Option<String>>,
}

impl RingStatus {
    fn new() -> Self {
        Self {
            overrun: CachePadded::new(AtomicBool::new(false)),
            dropped: CachePadded::new(AtomicUsize::new(0)),
            device_fault: Mutex::new(None),
        }
    }
}

/// Writer half, owned by the device data callback
pub struct RingWriter {
    producer: RingProducer,
    status: Arc<RingStatus>,
}

/// Fault reporter, owned by the device error callback
#[derive(Clone)]
pub struct FaultHandle {
    status: Arc<RingStatus>,
}

/// Reader half, owned by the frame source
pub struct RingReader {
    consumer: RingConsumer,
    status: Arc<RingStatus>,
}

/// Create a capture ring with the given capacity in samples
pub fn capture_ring(capacity: usize) -> (RingWriter, RingReader) {
    debug!("Creating capture ring with capacity: {} samples", capacity);

    let rb = RingBuffer::new(capacity);
    let (producer, consumer) = rb.split();
    let status = Arc::new(RingStatus::new());

    (
        RingWriter {
            producer,
            status: Arc::clone(&status),
        },
        RingReader { consumer, status },
    )
}

impl RingWriter {
    /// Append samples without blocking
    ///
    /// Samples that do not fit are discarded and the ring is marked as
    /// overrun. Returns the number of samples stored.
    pub fn push(&mut self, samples: &[AudioSample]) -> usize {
        self.push_iter(samples.iter().copied(), samples.len())
    }

    /// Append `len` samples produced by `samples` without blocking
    pub fn push_iter<I>(&mut self, samples: I, len: usize) -> usize
    where
        I: Iterator<Item = AudioSample>,
    {
        let vacant = self.producer.vacant_len();
        let written = self.producer.push_iter(samples.take(vacant));

        if written < len {
            let lost = len - written;
            self.status.dropped.fetch_add(lost, Ordering::Relaxed);
            self.status.overrun.store(true, Ordering::Release);
        }

        written
    }

    pub fn fault_handle(&self) -> FaultHandle {
        FaultHandle {
            status: Arc::clone(&self.status),
        }
    }
}

impl FaultHandle {
    /// Record an unrecoverable device failure; the first reason wins
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Audio capture failed: {}", reason);

        if let Ok(mut slot) = self.status.device_fault.lock() {
            slot.get_or_insert(reason);
        }
    }
}

impl RingReader {
    /// Number of samples waiting to be read
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    /// Remove exactly `count` samples, or nothing if fewer are buffered
    pub fn read_exact(&mut self, count: usize) -> Option<Vec<AudioSample>> {
        if self.consumer.occupied_len() < count {
            return None;
        }

        let mut samples = vec![0; count];
        let read = self.consumer.pop_slice(&mut samples);
        debug_assert_eq!(read, count);

        Some(samples)
    }

    /// Fault reported by the writer side, if any
    ///
    /// A device fault takes precedence over an overrun.
    pub fn fault(&self) -> Option<RingFault> {
        let device = self
            .status
            .device_fault
            .lock()
            .ok()
            .and_then(|slot| slot.clone());

        if let Some(reason) = device {
            return Some(RingFault::Device(reason));
        }

        if self.status.overrun.load(Ordering::Acquire) {
            return Some(RingFault::Overrun(self.status.dropped.load(Ordering::Relaxed)));
        }

        None
    }
}
