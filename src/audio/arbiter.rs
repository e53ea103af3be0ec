//! Microphone arbitration
//!
//! One physical input is shared by the recorder, the level meter and the
//! recognition engine. Reads go through a [`SourceLease`]; long-running
//! consumers additionally hold a [`SessionGuard`] so recording and
//! recognition can never overlap.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::frame::{CHUNK_SAMPLES, LEVEL_SAMPLES, level_percent};
use super::input::AudioInput;
use crate::{Error, Result};

/// Reads performed to flush stale audio when a session starts
pub const WARM_UP_READS: usize = 10;

/// Per-read timeout during warm-up
pub const WARM_UP_TIMEOUT: Duration = Duration::from_millis(100);

/// Read timeout for an opportunistic level measurement
const LEVEL_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Long-running consumers of the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Recognition,
    Recording,
}

impl SessionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recognition => "recognition",
            Self::Recording => "recording",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware read counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub ok: u64,
    pub errors: u64,
    pub empty: u64,
}

/// Serializes access to a single [`AudioInput`]
pub struct SourceArbiter {
    input: Mutex<Box<dyn AudioInput>>,
    session: Mutex<Option<SessionKind>>,
    holder: Mutex<&'static str>,
    last_level: AtomicU8,
    reads_ok: AtomicU64,
    reads_err: AtomicU64,
    reads_empty: AtomicU64,
}

impl SourceArbiter {
    #[must_use]
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        tracing::debug!(source = input.name(), "audio source registered");
        Self {
            input: Mutex::new(input),
            session: Mutex::new(None),
            holder: Mutex::new(""),
            last_level: AtomicU8::new(0),
            reads_ok: AtomicU64::new(0),
            reads_err: AtomicU64::new(0),
            reads_empty: AtomicU64::new(0),
        }
    }

    /// Take exclusive read access
    ///
    /// A zero `timeout` never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if another holder keeps the input past `timeout`
    pub fn acquire(&self, tag: &'static str, timeout: Duration) -> Result<SourceLease<'_>> {
        let guard = if timeout.is_zero() {
            self.input.try_lock()
        } else {
            self.input.try_lock_for(timeout)
        };

        let Some(input) = guard else {
            let holder = *self.holder.lock();
            tracing::trace!(tag, holder, "audio source busy");
            return Err(Error::Busy(format!("audio source held by {holder}")));
        };

        *self.holder.lock() = tag;
        Ok(SourceLease {
            arbiter: self,
            input,
        })
    }

    /// Claim the microphone for a recording or recognition session
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if any session is already active
    pub fn begin_session(self: &Arc<Self>, kind: SessionKind) -> Result<SessionGuard> {
        let mut session = self.session.lock();
        if let Some(active) = *session {
            return Err(Error::Busy(format!("{active} in progress")));
        }
        *session = Some(kind);
        drop(session);

        tracing::debug!(session = %kind, "audio session started");
        Ok(SessionGuard {
            arbiter: Arc::clone(self),
            kind,
        })
    }

    /// Kind of session currently holding the microphone
    #[must_use]
    pub fn active_session(&self) -> Option<SessionKind> {
        *self.session.lock()
    }

    /// Current microphone level (0-100)
    ///
    /// While a session owns the microphone, or another caller holds the
    /// input, the last cached level is returned instead of reading.
    #[must_use]
    pub fn level(&self) -> u8 {
        let cached = self.last_level.load(Ordering::Relaxed);
        if self.active_session().is_some() {
            return cached;
        }

        let Ok(mut lease) = self.acquire("level", Duration::ZERO) else {
            return cached;
        };

        lease.skip_to_latest(LEVEL_SAMPLES);
        let mut buf = [0i16; LEVEL_SAMPLES];
        match lease.read(&mut buf, LEVEL_READ_TIMEOUT) {
            Ok(n) if n > 0 => {
                let level = level_percent(&buf[..n]);
                self.note_level(level);
                level
            }
            Ok(_) => cached,
            Err(e) => {
                tracing::debug!(error = %e, "level read failed, using cached level");
                cached
            }
        }
    }

    /// Record a level computed by a session owner from audio it already read
    pub fn note_level(&self, level: u8) {
        self.last_level.store(level.min(100), Ordering::Relaxed);
    }

    /// Snapshot of hardware read counters
    #[must_use]
    pub fn read_stats(&self) -> ReadStats {
        ReadStats {
            ok: self.reads_ok.load(Ordering::Relaxed),
            errors: self.reads_err.load(Ordering::Relaxed),
            empty: self.reads_empty.load(Ordering::Relaxed),
        }
    }

    pub fn reset_read_stats(&self) {
        self.reads_ok.store(0, Ordering::Relaxed);
        self.reads_err.store(0, Ordering::Relaxed);
        self.reads_empty.store(0, Ordering::Relaxed);
    }

    fn end_session(&self, kind: SessionKind) {
        let mut session = self.session.lock();
        if *session == Some(kind) {
            *session = None;
            tracing::debug!(session = %kind, "audio session ended");
        }
    }
}

/// Exclusive read access to the input; released on drop
pub struct SourceLease<'a> {
    arbiter: &'a SourceArbiter,
    input: MutexGuard<'a, Box<dyn AudioInput>>,
}

impl SourceLease<'_> {
    /// Read up to `buf.len()` samples
    ///
    /// Driver errors are returned as-is and never retried here.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying input fails
    pub fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        match self.input.read(buf, timeout) {
            Ok(0) => {
                self.arbiter.reads_empty.fetch_add(1, Ordering::Relaxed);
                Ok(0)
            }
            Ok(n) => {
                self.arbiter.reads_ok.fetch_add(1, Ordering::Relaxed);
                Ok(n)
            }
            Err(e) => {
                self.arbiter.reads_err.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Discard queued audio except the newest `keep` samples
    pub fn skip_to_latest(&mut self, keep: usize) {
        self.input.skip_to_latest(keep);
    }
}

impl Drop for SourceLease<'_> {
    fn drop(&mut self) {
        *self.arbiter.holder.lock() = "";
    }
}

/// Marks the microphone as owned by one session until dropped
pub struct SessionGuard {
    arbiter: Arc<SourceArbiter>,
    kind: SessionKind,
}

impl SessionGuard {
    #[must_use]
    pub const fn kind(&self) -> SessionKind {
        self.kind
    }

    #[must_use]
    pub fn arbiter(&self) -> &Arc<SourceArbiter> {
        &self.arbiter
    }

    /// Flush stale audio left in the driver before real processing begins
    ///
    /// Returns the number of reads that produced samples. Failures are
    /// counted and logged, not propagated. Stops early once `cancel` is set.
    pub fn warm_up(&self, cancel: &AtomicBool) -> usize {
        let mut buf = vec![0i16; CHUNK_SAMPLES];
        let mut good = 0;

        for _ in 0..WARM_UP_READS {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let Ok(mut lease) = self.arbiter.acquire(self.kind.as_str(), WARM_UP_TIMEOUT) else {
                continue;
            };
            match lease.read(&mut buf, WARM_UP_TIMEOUT) {
                Ok(n) if n > 0 => good += 1,
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "warm-up read failed"),
            }
        }

        tracing::debug!(session = %self.kind, good, reads = WARM_UP_READS, "audio warm-up complete");
        good
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.arbiter.end_session(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::input::MemoryInput;

    fn arbiter_with(samples: &[i16]) -> (Arc<SourceArbiter>, crate::audio::MemoryFeed) {
        let (input, feed) = MemoryInput::with_samples(samples);
        (Arc::new(SourceArbiter::new(Box::new(input))), feed)
    }

    #[test]
    fn cancelled_warm_up_reads_nothing() {
        let (arbiter, feed) = arbiter_with(&[1; CHUNK_SAMPLES]);
        let session = arbiter.begin_session(SessionKind::Recording).unwrap();
        assert_eq!(session.warm_up(&AtomicBool::new(true)), 0);
        assert_eq!(feed.pending(), CHUNK_SAMPLES);
    }

    #[test]
    fn non_blocking_acquire_reports_busy() {
        let (arbiter, _feed) = arbiter_with(&[]);
        let _held = arbiter.acquire("recorder", Duration::ZERO).unwrap();

        let err = arbiter.acquire("level", Duration::ZERO).err().unwrap();
        assert!(matches!(err, Error::Busy(ref m) if m.contains("recorder")));
    }

    #[test]
    fn lease_is_released_on_drop() {
        let (arbiter, _feed) = arbiter_with(&[]);
        drop(arbiter.acquire("a", Duration::ZERO).unwrap());
        assert!(arbiter.acquire("b", Duration::ZERO).is_ok());
    }

    #[test]
    fn sessions_are_mutually_exclusive() {
        let (arbiter, _feed) = arbiter_with(&[]);

        let rec = arbiter.begin_session(SessionKind::Recording).unwrap();
        assert!(matches!(
            arbiter.begin_session(SessionKind::Recognition),
            Err(Error::Busy(_))
        ));
        assert!(matches!(
            arbiter.begin_session(SessionKind::Recording),
            Err(Error::Busy(_))
        ));

        drop(rec);
        let sr = arbiter.begin_session(SessionKind::Recognition).unwrap();
        assert_eq!(arbiter.active_session(), Some(SessionKind::Recognition));
        drop(sr);
        assert_eq!(arbiter.active_session(), None);
    }

    #[test]
    fn level_reads_when_idle_and_caches_during_session() {
        let (arbiter, feed) = arbiter_with(&[8_192; LEVEL_SAMPLES]);
        assert_eq!(arbiter.level(), 50);

        let session = arbiter.begin_session(SessionKind::Recording).unwrap();
        feed.push(&[16_384; LEVEL_SAMPLES]);
        assert_eq!(arbiter.level(), 50);
        assert_eq!(feed.pending(), LEVEL_SAMPLES);

        arbiter.note_level(10);
        assert_eq!(arbiter.level(), 10);
        drop(session);

        assert_eq!(arbiter.level(), 100);
    }

    #[test]
    fn idle_level_measures_newest_audio() {
        let (arbiter, feed) = arbiter_with(&[0; LEVEL_SAMPLES * 8]);
        feed.push(&[16_384; LEVEL_SAMPLES]);
        assert_eq!(arbiter.level(), 100);
        assert_eq!(feed.pending(), 0);
    }

    #[test]
    fn level_falls_back_to_cache_on_driver_error() {
        let (arbiter, feed) = arbiter_with(&[]);
        arbiter.note_level(42);
        feed.fail("i2s timeout");
        assert_eq!(arbiter.level(), 42);
        assert_eq!(arbiter.read_stats().errors, 1);
    }

    #[test]
    fn warm_up_counts_successful_reads() {
        let (arbiter, _feed) = arbiter_with(&vec![1; CHUNK_SAMPLES * 3]);
        let session = arbiter.begin_session(SessionKind::Recognition).unwrap();
        assert_eq!(session.warm_up(&AtomicBool::new(false)), 3);
        let stats = arbiter.read_stats();
        assert_eq!(stats.ok, 3);
        assert_eq!(stats.empty, 7);

        arbiter.reset_read_stats();
        assert_eq!(arbiter.read_stats(), ReadStats::default());
    }
}
