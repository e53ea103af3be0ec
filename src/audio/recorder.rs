//! WAV recording from the arbitrated microphone

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::arbiter::{SessionGuard, SessionKind, SourceArbiter};
use super::frame::{CHUNK_SAMPLES, SAMPLE_RATE, level_percent};
use super::preprocess::PreprocessingState;
use crate::config::SharedTuning;
use crate::{Error, Result};

/// Blocking read timeout for each recorded chunk
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Polls while waiting for the writer thread to finish
const STOP_POLLS: u32 = 50;

/// Interval between stop polls
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Format of every recording: 16-bit mono PCM at [`SAMPLE_RATE`]
#[must_use]
pub const fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Incremental WAV writer
///
/// The header is written with a placeholder size on creation and rewritten
/// with the true data size on [`finalize`](Self::finalize).
pub struct WavSink {
    writer: hound::WavWriter<BufWriter<File>>,
    samples: u64,
}

impl WavSink {
    /// # Errors
    ///
    /// Returns error if the file cannot be created
    pub fn create(path: &Path) -> Result<Self> {
        let writer = hound::WavWriter::create(path, wav_spec())?;
        Ok(Self { writer, samples: 0 })
    }

    /// # Errors
    ///
    /// Returns error if writing fails
    pub fn write(&mut self, samples: &[i16]) -> Result<()> {
        for &s in samples {
            self.writer.write_sample(s)?;
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Rewrite the header and close the file, returning the sample count
    ///
    /// # Errors
    ///
    /// Returns error if the header cannot be rewritten
    pub fn finalize(self) -> Result<u64> {
        self.writer.finalize()?;
        Ok(self.samples)
    }
}

/// A finished recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub samples: u64,
}

impl RecordingSummary {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.samples * 1000 / u64::from(SAMPLE_RATE))
    }
}

/// A recording on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInfo {
    pub name: String,
    pub bytes: u64,
}

struct ActiveRecording {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    handle: JoinHandle<Result<u64>>,
}

/// Records the microphone to WAV files on a worker thread
pub struct Recorder {
    arbiter: Arc<SourceArbiter>,
    tuning: SharedTuning,
    dir: PathBuf,
    max_duration: Duration,
    active: Mutex<Option<ActiveRecording>>,
}

impl Recorder {
    #[must_use]
    pub fn new(
        arbiter: Arc<SourceArbiter>,
        tuning: SharedTuning,
        dir: impl Into<PathBuf>,
        max_duration: Duration,
    ) -> Self {
        Self {
            arbiter,
            tuning,
            dir: dir.into(),
            max_duration,
            active: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start recording to `<dir>/rec_<unix_ms>.wav`
    ///
    /// # Errors
    ///
    /// Returns error if already recording, the microphone is in use, or the
    /// file cannot be created
    pub fn start(&self) -> Result<PathBuf> {
        let name = format!("rec_{}.wav", chrono::Utc::now().timestamp_millis());
        let path = self.dir.join(name);
        self.start_at(&path)?;
        Ok(path)
    }

    /// Start recording to an explicit path
    ///
    /// # Errors
    ///
    /// Returns error if already recording, the microphone is in use, or the
    /// file cannot be created
    pub fn start_at(&self, path: &Path) -> Result<()> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if !current.handle.is_finished() {
                return Err(Error::InvalidState("already recording".to_string()));
            }
            if let Some(finished) = active.take() {
                reap(finished);
            }
        }

        let guard = self.arbiter.begin_session(SessionKind::Recording)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sink = WavSink::create(path)?;

        let stop = Arc::new(AtomicBool::new(false));
        let written = Arc::new(AtomicU64::new(0));
        let max_samples = self.max_duration.as_secs() * u64::from(SAMPLE_RATE);

        let worker = RecordWorker {
            guard,
            tuning: Arc::clone(&self.tuning),
            stop: Arc::clone(&stop),
            written: Arc::clone(&written),
            max_samples,
        };
        let handle = std::thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || worker.run(sink))?;

        tracing::info!(path = %path.display(), "recording started");

        *active = Some(ActiveRecording {
            path: path.to_path_buf(),
            stop,
            written,
            handle,
        });
        Ok(())
    }

    /// Stop the current recording and finalize the file
    ///
    /// # Errors
    ///
    /// Returns error if nothing is recording, the writer does not finish in
    /// time, or the recording failed
    pub fn stop(&self) -> Result<RecordingSummary> {
        let Some(recording) = self.active.lock().take() else {
            return Err(Error::InvalidState("not recording".to_string()));
        };

        recording.stop.store(true, Ordering::SeqCst);

        let mut polls = 0;
        while !recording.handle.is_finished() {
            if polls >= STOP_POLLS {
                tracing::warn!(path = %recording.path.display(), "recorder did not stop in time");
                *self.active.lock() = Some(recording);
                return Err(Error::StopTimeout("recording"));
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
            polls += 1;
        }

        let samples = recording
            .handle
            .join()
            .map_err(|_| Error::Audio("recorder thread panicked".to_string()))??;

        let summary = RecordingSummary {
            path: recording.path,
            samples,
        };
        tracing::info!(
            path = %summary.path.display(),
            samples,
            duration_ms = u64::try_from(summary.duration().as_millis()).unwrap_or(u64::MAX),
            "recording stopped"
        );
        Ok(summary)
    }

    /// Whether a recording is in progress
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    /// Samples written by the current or last unreaped recording
    #[must_use]
    pub fn samples_written(&self) -> u64 {
        self.active
            .lock()
            .as_ref()
            .map_or(0, |a| a.written.load(Ordering::Relaxed))
    }

    /// List recordings in the recordings directory, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the directory exists but cannot be read
    pub fn list(&self) -> Result<Vec<RecordingInfo>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut recordings = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !Path::new(&name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
            {
                continue;
            }
            recordings.push(RecordingInfo {
                name,
                bytes: entry.metadata()?.len(),
            });
        }
        recordings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(recordings)
    }

    /// Delete one recording by file name, or every recording for `all`
    ///
    /// The recording in progress is never deleted. Returns the names
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `name` is not a plain `.wav`
    /// file name or does not exist, or `Error::Busy` if it is being written
    pub fn delete(&self, name: &str) -> Result<Vec<String>> {
        let active = self
            .active
            .lock()
            .as_ref()
            .filter(|a| !a.handle.is_finished())
            .map(|a| a.path.clone());

        if name.eq_ignore_ascii_case("all") {
            let mut deleted = Vec::new();
            for recording in self.list()? {
                let path = self.dir.join(&recording.name);
                if active.as_deref() == Some(path.as_path()) {
                    tracing::debug!(name = %recording.name, "skipping recording in progress");
                    continue;
                }
                std::fs::remove_file(&path)?;
                deleted.push(recording.name);
            }
            tracing::info!(count = deleted.len(), "recordings deleted");
            return Ok(deleted);
        }

        let plain = Path::new(name).file_name().is_some_and(|f| f == name);
        let wav = Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if !plain || !wav {
            return Err(Error::InvalidArgument(format!(
                "'{name}' is not a recording file name"
            )));
        }

        let path = self.dir.join(name);
        if active.as_deref() == Some(path.as_path()) {
            return Err(Error::Busy(format!("{name} is being recorded")));
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "recording deleted");
                Ok(vec![name.to_string()])
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::InvalidArgument(format!("File not found: {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn reap(recording: ActiveRecording) {
    match recording.handle.join() {
        Ok(Ok(samples)) => {
            tracing::debug!(path = %recording.path.display(), samples, "reaped finished recording");
        }
        Ok(Err(e)) => {
            tracing::warn!(path = %recording.path.display(), error = %e, "previous recording failed");
        }
        Err(_) => tracing::warn!("previous recorder thread panicked"),
    }
}

struct RecordWorker {
    guard: SessionGuard,
    tuning: SharedTuning,
    stop: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    max_samples: u64,
}

impl RecordWorker {
    fn run(self, mut sink: WavSink) -> Result<u64> {
        self.guard.warm_up(&self.stop);

        let result = self.capture(&mut sink);
        let samples = sink.finalize()?;
        result.map(|()| samples)
    }

    fn capture(&self, sink: &mut WavSink) -> Result<()> {
        let arbiter = self.guard.arbiter();
        let mut state = PreprocessingState::new(self.tuning.read().mic_gain_percent);
        let mut buf = vec![0i16; CHUNK_SAMPLES];

        while !self.stop.load(Ordering::SeqCst) && sink.samples() < self.max_samples {
            let n = match arbiter.acquire("recorder", READ_TIMEOUT) {
                Ok(mut lease) => lease.read(&mut buf, READ_TIMEOUT)?,
                Err(_) => continue,
            };
            if n == 0 {
                continue;
            }

            let remaining = usize::try_from(self.max_samples - sink.samples()).unwrap_or(usize::MAX);
            let chunk = &mut buf[..n.min(remaining)];

            let (gain, filters, percent) = {
                let tuning = self.tuning.read();
                (tuning.software_gain(), tuning.filters, tuning.mic_gain_percent)
            };
            state.set_gain_percent(percent);
            state.process(chunk, gain, filters);
            arbiter.note_level(level_percent(chunk));

            sink.write(chunk)?;
            self.written.store(sink.samples(), Ordering::Relaxed);
        }

        if sink.samples() >= self.max_samples {
            tracing::info!(samples = sink.samples(), "recording reached length cap");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::input::MemoryInput;
    use crate::config::Tuning;

    fn recorder(dir: &Path, samples: &[i16], max: Duration) -> (Recorder, Arc<SourceArbiter>) {
        let (input, _feed) = MemoryInput::with_samples(samples);
        let arbiter = Arc::new(SourceArbiter::new(Box::new(input)));
        let tuning = Arc::new(parking_lot::RwLock::new(Tuning::default()));
        (Recorder::new(Arc::clone(&arbiter), tuning, dir, max), arbiter)
    }

    #[test]
    fn sink_round_trips_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.wav");

        let mut sink = WavSink::create(&path).unwrap();
        sink.write(&[1, -2, 3, i16::MAX, i16::MIN]).unwrap();
        assert_eq!(sink.finalize().unwrap(), 5);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec(), wav_spec());
        let back: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(back, vec![1, -2, 3, i16::MAX, i16::MIN]);
    }

    #[test]
    fn cannot_start_twice_or_stop_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _arbiter) = recorder(dir.path(), &[], Duration::from_secs(60));

        assert!(matches!(recorder.stop(), Err(Error::InvalidState(_))));

        let path = recorder.start().unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("rec_"));
        assert!(recorder.is_recording());
        assert!(matches!(recorder.start(), Err(Error::InvalidState(_))));

        recorder.stop().unwrap();
        assert!(!recorder.is_recording());
    }

    #[test]
    fn recording_holds_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, arbiter) = recorder(dir.path(), &[], Duration::from_secs(60));

        recorder.start().unwrap();
        assert!(matches!(
            arbiter.begin_session(SessionKind::Recognition),
            Err(Error::Busy(_))
        ));
        recorder.stop().unwrap();
        assert!(arbiter.begin_session(SessionKind::Recognition).is_ok());
    }

    #[test]
    fn length_cap_ends_recording() {
        let dir = tempfile::tempdir().unwrap();
        let warm_up = CHUNK_SAMPLES * crate::audio::arbiter::WARM_UP_READS;
        let samples = vec![100i16; warm_up + SAMPLE_RATE as usize * 2];
        let (recorder, _arbiter) = recorder(dir.path(), &samples, Duration::from_secs(1));

        recorder.start().unwrap();
        for _ in 0..200 {
            if !recorder.is_recording() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let summary = recorder.stop().unwrap();
        assert_eq!(summary.samples, u64::from(SAMPLE_RATE));
        assert_eq!(summary.duration(), Duration::from_secs(1));
    }

    #[test]
    fn lists_only_wav_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rec_2.wav"), b"RIFF").unwrap();
        std::fs::write(dir.path().join("rec_1.wav"), b"RIFF").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let (recorder, _arbiter) = recorder(dir.path(), &[], Duration::from_secs(60));
        let names: Vec<_> = recorder.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["rec_1.wav", "rec_2.wav"]);
    }

    #[test]
    fn delete_removes_named_or_all_recordings() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["rec_1.wav", "rec_2.wav", "rec_3.wav"] {
            std::fs::write(dir.path().join(name), b"RIFF").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let (recorder, _arbiter) = recorder(dir.path(), &[], Duration::from_secs(60));

        assert_eq!(recorder.delete("rec_2.wav").unwrap(), vec!["rec_2.wav"]);
        assert!(matches!(recorder.delete("rec_2.wav"), Err(Error::InvalidArgument(_))));
        assert!(matches!(recorder.delete("../rec_1.wav"), Err(Error::InvalidArgument(_))));
        assert!(matches!(recorder.delete("notes.txt"), Err(Error::InvalidArgument(_))));

        assert_eq!(recorder.delete("all").unwrap(), vec!["rec_1.wav", "rec_3.wav"]);
        assert!(recorder.list().unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn delete_spares_the_recording_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.wav"), b"RIFF").unwrap();
        let (recorder, _arbiter) = recorder(dir.path(), &[], Duration::from_secs(60));

        let path = recorder.start().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(matches!(recorder.delete(&name), Err(Error::Busy(_))));
        assert_eq!(recorder.delete("all").unwrap(), vec!["old.wav"]);
        assert!(path.exists());
        recorder.stop().unwrap();
    }
}
