//! Audio input sources
//!
//! [`AudioInput`] is the seam between the arbiter and whatever produces PCM:
//! the default microphone via `cpal`, a WAV file, or an in-memory buffer.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::frame::SAMPLE_RATE;
use crate::{Error, Result};

/// Most audio kept while no one is reading (2 seconds)
const MAX_QUEUED_SAMPLES: usize = SAMPLE_RATE as usize * 2;

/// Poll interval while waiting on the capture callback
const CAPTURE_POLL: Duration = Duration::from_millis(2);

/// A blocking source of 16-bit mono PCM at [`SAMPLE_RATE`]
pub trait AudioInput: Send {
    /// Fill `buf` with up to `buf.len()` samples, waiting at most `timeout`
    ///
    /// Returns the number of samples written; zero means no audio arrived in
    /// time.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying driver fails
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize>;

    /// Drop queued audio older than the newest `keep` samples
    ///
    /// Sources without a backlog ignore this.
    fn skip_to_latest(&mut self, _keep: usize) {}

    /// Human-readable source name for logs
    fn name(&self) -> &str;
}

/// Samples shared between a [`MemoryFeed`] and its reader
#[derive(Default)]
struct SampleQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Default)]
struct QueueState {
    samples: VecDeque<i16>,
    error: Option<String>,
}

impl SampleQueue {
    fn fail(&self, message: String) {
        self.state.lock().error = Some(message);
        self.ready.notify_all();
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32_767.0).clamp(-32_768.0, 32_767.0) as i16
}

/// Writing half of a [`CaptureQueue`], owned by the capture callback
///
/// Pushes never block or lock; samples that do not fit are dropped.
struct CaptureWriter {
    producer: HeapProd<i16>,
}

impl CaptureWriter {
    /// Returns how many samples were queued
    fn push(&mut self, data: &[f32]) -> usize {
        let mut pushed = 0;
        for &s in data {
            if self.producer.try_push(to_i16(s)).is_err() {
                break;
            }
            pushed += 1;
        }
        pushed
    }
}

/// Reading half of the lock-free hand-off from the capture callback
struct CaptureQueue {
    consumer: HeapCons<i16>,
    error: Arc<Mutex<Option<String>>>,
}

fn capture_queue(capacity: usize) -> (CaptureWriter, CaptureQueue) {
    let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
    (
        CaptureWriter { producer },
        CaptureQueue {
            consumer,
            error: Arc::default(),
        },
    )
}

impl CaptureQueue {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        while self.consumer.occupied_len() < buf.len()
            && self.error.lock().is_none()
            && Instant::now() < deadline
        {
            std::thread::sleep(CAPTURE_POLL);
        }

        if let Some(err) = self.error.lock().take() {
            return Err(Error::Audio(err));
        }
        Ok(self.consumer.pop_slice(buf))
    }

    fn skip_to_latest(&mut self, keep: usize) {
        let stale = self.consumer.occupied_len().saturating_sub(keep);
        if stale > 0 {
            self.consumer.skip(stale);
        }
    }
}

/// Captures from the default input device
///
/// `cpal` streams are not `Send`, so the stream lives on its own thread. The
/// data callback writes into a lock-free ring that readers drain.
pub struct CpalInput {
    name: String,
    queue: CaptureQueue,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInput {
    /// Open the default input device at 16kHz mono
    ///
    /// # Errors
    ///
    /// Returns error if no suitable device or configuration is available
    pub fn open() -> Result<Self> {
        let (writer, queue) = capture_queue(MAX_QUEUED_SAMPLES);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let stream_error = Arc::clone(&queue.error);
        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(writer, stream_error) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until the owner goes away
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let name = ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during setup".to_string()))??;

        tracing::info!(device = %name, sample_rate = SAMPLE_RATE, "audio capture started");

        Ok(Self {
            name,
            queue,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn build_stream(
    mut writer: CaptureWriter,
    error: Arc<Mutex<Option<String>>>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                writer.push(data);
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                *error.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let name = device.name().unwrap_or_else(|_| "default".to_string());
    Ok((stream, name))
}

impl AudioInput for CpalInput {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        self.queue.read(buf, timeout)
    }

    fn skip_to_latest(&mut self, keep: usize) {
        self.queue.skip_to_latest(keep);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Plays back a 16-bit mono WAV file as if it were a microphone
pub struct WavInput {
    name: String,
    samples: std::vec::IntoIter<i16>,
}

impl WavInput {
    /// Load a WAV file recorded at [`SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not 16-bit mono 16kHz
    pub fn open(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.sample_rate != SAMPLE_RATE || spec.bits_per_sample != 16 {
            return Err(Error::Audio(format!(
                "{}: expected 16-bit mono {SAMPLE_RATE}Hz, got {}-bit {}ch {}Hz",
                path.display(),
                spec.bits_per_sample,
                spec.channels,
                spec.sample_rate
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(path = %path.display(), samples = samples.len(), "wav input loaded");

        Ok(Self {
            name: path.display().to_string(),
            samples: samples.into_iter(),
        })
    }
}

impl AudioInput for WavInput {
    fn read(&mut self, buf: &mut [i16], _timeout: Duration) -> Result<usize> {
        let mut n = 0;
        for (dst, src) in buf.iter_mut().zip(&mut self.samples) {
            *dst = src;
            n += 1;
        }
        Ok(n)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An in-memory source fed through a cloneable [`MemoryFeed`]
///
/// Reads wait on the feed like a real device, so producers on other threads
/// can pace audio into a running session.
pub struct MemoryInput {
    queue: Arc<SampleQueue>,
}

/// Producer side of a [`MemoryInput`]
#[derive(Clone)]
pub struct MemoryFeed {
    queue: Arc<SampleQueue>,
}

impl MemoryInput {
    /// Create an empty input and its feed
    #[must_use]
    pub fn new() -> (Self, MemoryFeed) {
        let queue = Arc::new(SampleQueue::default());
        (
            Self {
                queue: Arc::clone(&queue),
            },
            MemoryFeed { queue },
        )
    }

    /// Create an input preloaded with `samples`
    #[must_use]
    pub fn with_samples(samples: &[i16]) -> (Self, MemoryFeed) {
        let (input, feed) = Self::new();
        feed.push(samples);
        (input, feed)
    }
}

impl MemoryFeed {
    /// Append samples for readers
    pub fn push(&self, samples: &[i16]) {
        let mut state = self.queue.state.lock();
        state.samples.extend(samples.iter().copied());
        drop(state);
        self.queue.ready.notify_all();
    }

    /// Make the next read fail with a driver error
    pub fn fail(&self, message: impl Into<String>) {
        self.queue.fail(message.into());
    }

    /// Samples not yet consumed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.state.lock().samples.len()
    }
}

impl AudioInput for MemoryInput {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        let mut state = self.queue.state.lock();
        if state.samples.is_empty() && state.error.is_none() {
            let _ = self.queue.ready.wait_while_for(
                &mut state,
                |s| s.samples.is_empty() && s.error.is_none(),
                timeout,
            );
        }

        if let Some(err) = state.error.take() {
            return Err(Error::Audio(err));
        }

        let n = buf.len().min(state.samples.len());
        for (dst, src) in buf.iter_mut().zip(state.samples.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn skip_to_latest(&mut self, keep: usize) {
        let mut state = self.queue.state.lock();
        let stale = state.samples.len().saturating_sub(keep);
        state.samples.drain(..stale);
    }

    fn name(&self) -> &str {
        "memory"
    }
}
